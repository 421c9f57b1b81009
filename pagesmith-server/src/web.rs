//! HTTP surface: `POST /api-endpoint` and `GET /health`.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use pagesmith_core::{DeliveryError, EvaluationReport, Outcome, Pipeline};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::validate::validate;

/// Attachments arrive inline, so bodies can be large.
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub secret: String,
}

/// Body of a completed `POST /api-endpoint`: the report plus what
/// happened to its delivery.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    #[serde(flatten)]
    pub report: EvaluationReport,
    /// Absent when the request named no evaluation URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryStatus>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<(), DeliveryError>> for DeliveryStatus {
    fn from(result: &Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => Self {
                delivered: true,
                attempts: None,
                error: None,
            },
            Err(e) => Self {
                delivered: false,
                attempts: Some(e.attempts),
                error: Some(e.to_string()),
            },
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api-endpoint", post(submit))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Validate, run the pipeline to completion and answer with the report.
/// A failed delivery is reported under `delivery` and leaves the HTTP
/// status alone.
///
/// The pipeline runs on its own task. If the client disconnects, this
/// handler's future is dropped, the guard cancels the token, and the
/// task abandons the Pages wait but still finishes and delivers its
/// report.
async fn submit(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match validate(&body, &state.secret) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected request");
            let body = serde_json::json!({ "status": "rejected", "error": e.to_string() });
            return (e.status(), Json(body)).into_response();
        }
    };
    tracing::info!(
        task = %request.task,
        round = request.round,
        nonce = %request.nonce,
        attachments = request.attachments.len(),
        "Accepted request"
    );

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let pipeline = state.pipeline.clone();
    let run = tokio::spawn(async move { pipeline.run(&request, cancel).await }).await;
    guard.disarm();

    match run {
        Ok(run) => {
            if let Some(Err(e)) = &run.delivery {
                tracing::warn!(error = %e, "Deployment finished but the report was not delivered");
            }
            let status = match run.report.status {
                Outcome::Failure => StatusCode::BAD_GATEWAY,
                Outcome::Success | Outcome::PartialFailure => StatusCode::OK,
            };
            let response = TaskResponse {
                report: run.report,
                delivery: run.delivery.as_ref().map(DeliveryStatus::from),
            };
            (status, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline task panicked");
            let body = serde_json::json!({ "status": "failure", "error": "internal error" });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}
