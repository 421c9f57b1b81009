//! Error taxonomy for the deployment pipeline.
//!
//! Every stage has its own error type. Errors that a later attempt could
//! clear (rate limits, 5xx, dropped connections) report themselves as
//! transient through [`Retryable`]; everything else is permanent and is
//! surfaced on the first occurrence.

use std::time::Duration;

use thiserror::Error;

/// Classification consulted by [`crate::retry::with_backoff`].
pub trait Retryable {
    /// Whether repeating the same call unchanged could succeed.
    fn is_transient(&self) -> bool;

    /// Server-requested wait before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

// ── GitHub API ─────────────────────────────────────────────────────────

/// A failed GitHub REST call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// 409 or 422: the resource exists, the ref moved, or the request
    /// contradicts current state.
    #[error("conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    #[error("rate limited on {resource}")]
    RateLimited {
        resource: String,
        retry_after: Option<Duration>,
    },

    #[error("GitHub API error {status} on {resource}: {message}")]
    Status {
        status: u16,
        resource: String,
        message: String,
    },

    #[error("transport error on {resource}: {message}")]
    Transport { resource: String, message: String },

    #[error("unexpected response from {resource}: {message}")]
    Decode { resource: String, message: String },
}

impl ApiError {
    /// Map an unsuccessful HTTP status to an error variant.
    pub fn from_status(status: u16, resource: &str, message: impl Into<String>) -> Self {
        let resource = resource.to_string();
        let message = message.into();
        match status {
            404 => ApiError::NotFound { resource },
            409 | 422 => ApiError::Conflict { resource, message },
            429 => ApiError::RateLimited {
                resource,
                retry_after: None,
            },
            _ => ApiError::Status {
                status,
                resource,
                message,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }
}

impl Retryable for ApiError {
    fn is_transient(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::Transport { .. } => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::NotFound { .. } | ApiError::Conflict { .. } | ApiError::Decode { .. } => {
                false
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// ── Attachments ────────────────────────────────────────────────────────

/// Why one attachment could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeFailure {
    #[error("not a data: URI")]
    NotDataUri,
    #[error("data URI has no ',' separating header from payload")]
    MissingPayload,
    #[error("unparseable media type {0:?}")]
    MediaType(String),
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("attachment name is empty or not a plain file name")]
    Name,
}

/// A single attachment that failed to decode. Collected, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("attachment {name:?}: {reason}")]
pub struct AttachmentDecodeError {
    pub name: String,
    pub reason: DecodeFailure,
}

// ── Generation ─────────────────────────────────────────────────────────

/// The LLM call failed or produced nothing usable. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("provider returned no files")]
    Empty,
    #[error("generated path {path:?} rejected: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("could not parse provider output: {0}")]
    Malformed(String),
}

// ── Provisioning ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("cannot derive a repository name from {0:?}")]
    InvalidName(String),
    #[error("repository {name} belongs to {actual}, expected {expected}")]
    OwnerMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Retryable for ProvisioningError {
    fn is_transient(&self) -> bool {
        match self {
            ProvisioningError::Api(e) => e.is_transient(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ProvisioningError::Api(e) => e.retry_after(),
            _ => None,
        }
    }
}

// ── Assembly ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    /// An empty generated set should have been rejected by generation.
    #[error("empty generated file set reached assembly")]
    EmptyGeneratedSet,
}

// ── Publishing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("nothing to publish")]
    EmptyFileSet,

    /// `fresh` is set when the repository was created by this run, where
    /// the initial branch can lag the create call by a few seconds.
    #[error("branch {branch} does not exist")]
    MissingBranch { branch: String, fresh: bool },

    #[error("uploading {path} failed: {source}")]
    Blob { path: String, source: ApiError },

    #[error("{step} failed: {source}")]
    Api { step: &'static str, source: ApiError },

    #[error("branch {branch} kept moving; gave up after {attempts} attempts")]
    Contended { branch: String, attempts: u32 },
}

impl Retryable for PublishError {
    fn is_transient(&self) -> bool {
        match self {
            PublishError::MissingBranch { fresh, .. } => *fresh,
            PublishError::Blob { source, .. } | PublishError::Api { source, .. } => {
                source.is_transient()
            }
            PublishError::EmptyFileSet | PublishError::Contended { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PublishError::Blob { source, .. } | PublishError::Api { source, .. } => {
                source.retry_after()
            }
            _ => None,
        }
    }
}

// ── Pages ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PagesError {
    #[error("enabling Pages failed: {0}")]
    Enable(ApiError),
    /// The caller went away while the site was being polled.
    #[error("Pages wait cancelled after {attempts} probes")]
    Cancelled { url: String, attempts: u32 },
}

// ── Delivery ───────────────────────────────────────────────────────────

/// One failed POST of the evaluation report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryAttemptError {
    #[error("endpoint answered {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(String),
}

impl Retryable for DeliveryAttemptError {
    fn is_transient(&self) -> bool {
        match self {
            DeliveryAttemptError::Status(status) => *status == 429 || *status >= 500,
            DeliveryAttemptError::Transport(_) => true,
        }
    }
}

/// The report could not be delivered. Never affects the deployment itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("report delivery to {url} failed after {attempts} attempt(s): {last}")]
pub struct DeliveryError {
    pub url: String,
    pub attempts: u32,
    pub last: DeliveryAttemptError,
}
