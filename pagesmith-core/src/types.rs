//! Data model shared by every pipeline stage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

// ── Request ────────────────────────────────────────────────────────────

/// An attachment as received: a name and an embedded `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSource {
    pub name: String,
    pub url: String,
}

/// A validated deployment request. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub email: String,
    pub task: String,
    pub round: u32,
    /// Caller-supplied token identifying this request instance.
    pub nonce: String,
    pub brief: String,
    pub attachments: Vec<AttachmentSource>,
    /// Acceptance checks the generated app should satisfy.
    pub checks: Vec<String>,
    pub evaluation_url: Option<String>,
}

/// A decoded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub name: String,
    /// Declared media type without parameters, e.g. `image/png`.
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentRef {
    /// Whether the payload is meant to be read as text.
    pub fn is_textual(&self) -> bool {
        let mt = self.media_type.as_str();
        mt.starts_with("text/")
            || mt.ends_with("+json")
            || mt.ends_with("+xml")
            || matches!(
                mt,
                "application/json" | "application/xml" | "application/javascript"
            )
    }

    /// Up to `limit` bytes of the payload as text, for textual attachments.
    pub fn excerpt(&self, limit: usize) -> Option<String> {
        if !self.is_textual() {
            return None;
        }
        let end = self.bytes.len().min(limit);
        let mut text = String::from_utf8_lossy(&self.bytes[..end]).into_owned();
        if end < self.bytes.len() {
            text.push_str("\n[truncated]");
        }
        Some(text)
    }
}

// ── Files ──────────────────────────────────────────────────────────────

/// Normalise a repository-relative path.
///
/// Strips leading `./` and `/`, rejects `..`, empty segments, backslashes
/// and anything under `.git/`.
pub fn normalize_path(raw: &str) -> Result<String, GenerationError> {
    let reject = |reason| GenerationError::InvalidPath {
        path: raw.to_string(),
        reason,
    };
    if raw.contains('\\') {
        return Err(reject("backslash in path"));
    }
    let trimmed = raw.trim().trim_start_matches("./").trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(reject("empty path"));
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" => return Err(reject("empty path segment")),
            "." => continue,
            ".." => return Err(reject("parent directory reference")),
            s => segments.push(s),
        }
    }
    if segments.first() == Some(&".git") {
        return Err(reject("inside .git"));
    }
    Ok(segments.join("/"))
}

/// Files produced by code generation: relative path → text content.
///
/// Paths are normalised on insertion and kept sorted, so iteration order
/// is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedFileSet {
    files: BTreeMap<String, String>,
}

impl GeneratedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `(path, content)` pairs. Later duplicates win.
    pub fn from_files<I, P, C>(files: I) -> Result<Self, GenerationError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut set = Self::new();
        for (path, content) in files {
            set.insert(path.as_ref(), content)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, path: &str, content: impl Into<String>) -> Result<(), GenerationError> {
        let path = normalize_path(path)?;
        self.files.insert(path, content.into());
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }
}

/// Generated files plus the injected LICENSE and README.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledFileSet {
    pub(crate) files: BTreeMap<String, String>,
    /// Paths added by assembly rather than generation.
    pub(crate) injected: Vec<String>,
    /// Injections skipped because generation already produced that path.
    pub(crate) preserved: Vec<String>,
}

impl AssembledFileSet {
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn injected(&self) -> &[String] {
        &self.injected
    }

    pub fn preserved(&self) -> &[String] {
        &self.preserved
    }
}

// ── Repository and commit ──────────────────────────────────────────────

/// The single repository all writes of one request go to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryHandle {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    /// True when the repository was already there before this run.
    pub existed: bool,
    pub html_url: String,
    pub private: bool,
}

impl RepositoryHandle {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// The commit that carries one request's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub sha: String,
    pub branch: String,
    /// When the commit was made; for a reused tip, that tip's commit time.
    pub timestamp: DateTime<Utc>,
    /// False when the branch already held identical content and the
    /// existing tip was reused instead of creating a new commit.
    pub pushed: bool,
}

// ── Pages ──────────────────────────────────────────────────────────────

/// Lifecycle of the Pages site for one request.
///
/// `Disabled → Enabling → Polling → Live` or `Polling → TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PagesStatus {
    Disabled,
    Enabling,
    Polling {
        attempts: u32,
    },
    Live {
        attempts: u32,
        /// Enable-to-live duration.
        latency_ms: u64,
        live_at: DateTime<Utc>,
    },
    TimedOut {
        attempts: u32,
        waited_ms: u64,
    },
}

impl PagesStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PagesStatus::Live { .. } | PagesStatus::TimedOut { .. })
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PagesStatus::Live { .. })
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: &PagesStatus) -> bool {
        use PagesStatus::{Disabled, Enabling, Live, Polling, TimedOut};
        matches!(
            (self, next),
            (Disabled, Enabling)
                | (Enabling, Polling { .. })
                | (Enabling, TimedOut { .. })
                | (Polling { .. }, Polling { .. })
                | (Polling { .. }, Live { .. })
                | (Polling { .. }, TimedOut { .. })
        )
    }
}

// ── Report ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialFailure,
    Failure,
}

/// Pipeline stage, used to say where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generation,
    Provisioning,
    Assembly,
    Publish,
    Pages,
    Complete,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Generation => write!(f, "generation"),
            Stage::Provisioning => write!(f, "provisioning"),
            Stage::Assembly => write!(f, "assembly"),
            Stage::Publish => write!(f, "publish"),
            Stage::Pages => write!(f, "pages"),
            Stage::Complete => write!(f, "complete"),
        }
    }
}

/// Result of one pipeline run, posted to the evaluation endpoint and
/// returned to the HTTP caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub status: Outcome,
    /// Stage the run stopped at; `complete` when every stage finished.
    pub stage: Stage,
    pub repo_url: Option<String>,
    pub commit_sha: Option<String>,
    pub pages_url: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachment_errors: Vec<String>,
    pub repository: Option<RepositoryHandle>,
    pub commit: Option<CommitResult>,
    pub pages_status: Option<PagesStatus>,
    pub started_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    /// When the page was confirmed reachable; `None` unless live.
    pub live_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EvaluationReport {
    /// Start a report for `request`; status stays `failure` until a
    /// commit is recorded.
    pub fn begin(request: &GenerationRequest) -> Self {
        Self {
            email: request.email.clone(),
            task: request.task.clone(),
            round: request.round,
            nonce: request.nonce.clone(),
            status: Outcome::Failure,
            stage: Stage::Generation,
            repo_url: None,
            commit_sha: None,
            pages_url: None,
            error: None,
            attachment_errors: Vec::new(),
            repository: None,
            commit: None,
            pages_status: None,
            started_at: Utc::now(),
            committed_at: None,
            live_at: None,
            finished_at: None,
        }
    }

    pub fn record_repository(&mut self, handle: &RepositoryHandle) {
        self.repo_url = Some(handle.html_url.clone());
        self.repository = Some(handle.clone());
    }

    pub fn record_commit(&mut self, commit: &CommitResult) {
        self.commit_sha = Some(commit.sha.clone());
        self.committed_at = Some(commit.timestamp);
        self.commit = Some(commit.clone());
    }

    pub fn record_pages(&mut self, url: &str, status: &PagesStatus) {
        self.pages_url = Some(url.to_string());
        if let PagesStatus::Live { live_at, .. } = status {
            self.live_at = Some(*live_at);
        }
        self.pages_status = Some(status.clone());
    }

    /// Record where the run stopped and why.
    pub fn fail(&mut self, stage: Stage, detail: impl Into<String>) {
        self.stage = stage;
        self.error = Some(detail.into());
    }

    /// Derive the overall outcome and stamp the finish time.
    ///
    /// A run whose commit landed is never a plain `failure`.
    pub fn finish(&mut self) {
        let live = self.pages_status.as_ref().is_some_and(PagesStatus::is_live);
        self.status = if self.commit.is_none() {
            Outcome::Failure
        } else if live && self.error.is_none() {
            Outcome::Success
        } else {
            Outcome::PartialFailure
        };
        if self.status == Outcome::Success {
            self.stage = Stage::Complete;
        }
        self.finished_at = Some(Utc::now());
    }
}
