//! Request body parsing and validation.
//!
//! Nothing here talks to the network: a request that fails validation is
//! rejected before any LLM or GitHub call is made.

use axum::http::StatusCode;
use pagesmith_core::{AttachmentSource, GenerationRequest};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid secret")]
    Unauthorized,
    #[error("malformed request body: {0}")]
    Malformed(String),
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn status(&self) -> StatusCode {
        match self {
            ValidationError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Wire shape of `POST /api-endpoint`.
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub task: String,
    pub round: Option<u32>,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentSource>,
    #[serde(default)]
    pub checks: Vec<String>,
    pub evaluation_url: Option<String>,
}

/// Parse `body` and check it against the shared `secret`.
///
/// The secret is checked before any other field so an unauthenticated
/// caller learns nothing about what else is wrong.
pub fn validate(body: &[u8], secret: &str) -> Result<GenerationRequest, ValidationError> {
    let req: TaskRequest =
        serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    if !secrets_match(&req.secret, secret) {
        return Err(ValidationError::Unauthorized);
    }

    let required = |value: &str, field: &'static str| {
        if value.trim().is_empty() {
            Err(ValidationError::Missing(field))
        } else {
            Ok(value.trim().to_string())
        }
    };
    let email = required(&req.email, "email")?;
    let task = required(&req.task, "task")?;
    let nonce = required(&req.nonce, "nonce")?;
    let brief = required(&req.brief, "brief")?;

    let round = req.round.unwrap_or(1);
    if round == 0 {
        return Err(ValidationError::Invalid {
            field: "round",
            reason: "must be 1 or greater".into(),
        });
    }

    let evaluation_url = match req.evaluation_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(check_url(raw)?),
    };

    for att in &req.attachments {
        if att.name.trim().is_empty() {
            return Err(ValidationError::Missing("attachments[].name"));
        }
        if att.url.trim().is_empty() {
            return Err(ValidationError::Missing("attachments[].url"));
        }
    }

    Ok(GenerationRequest {
        email,
        task,
        round,
        nonce,
        brief,
        attachments: req.attachments,
        checks: req.checks,
        evaluation_url,
    })
}

fn check_url(raw: &str) -> Result<String, ValidationError> {
    let invalid = |reason: String| ValidationError::Invalid {
        field: "evaluation_url",
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}

/// Constant-time comparison. An empty configured secret matches nothing.
fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0 && !expected.is_empty()
}
