//! HTTP service in front of the pagesmith pipeline.

pub mod config;
pub mod validate;
pub mod web;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use pagesmith_core::{GitHubClient, HttpProbe, LlmCodeGenerator, OutcomeReporter, Pipeline};

use crate::config::ServiceConfig;
use crate::web::AppState;

/// Wire the production collaborators (GitHub REST, Claude, HTTP probe).
pub fn build_state(config: &ServiceConfig) -> anyhow::Result<Arc<AppState>> {
    let github = GitHubClient::with_api_base(config.github_token.clone(), &config.github_api_base)
        .context("building GitHub client")?;
    let generation = config.generation();
    let generator = LlmCodeGenerator::from_config(config.api_key.clone(), &generation);
    let pipeline_config = config.pipeline();
    let probe = HttpProbe::new(pipeline_config.pages.probe_timeout);
    let reporter = OutcomeReporter::new(config.report_retry(), config.report_timeout());

    let pipeline = Pipeline::new(
        pipeline_config,
        Arc::new(generator),
        Arc::new(github),
        Arc::new(probe),
        reporter,
    );
    Ok(Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        secret: config.secret.clone(),
    }))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "pagesmith listening");
    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}
