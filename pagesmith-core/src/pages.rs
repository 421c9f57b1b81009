//! GitHub Pages activation and liveness polling.
//!
//! `Disabled → Enabling → Polling → Live | TimedOut`. The wait is bounded
//! twice: by a wall-clock deadline that also covers the enable call, and
//! by a maximum number of probes. Whichever bound is reached first ends
//! the wait in `TimedOut`, which is an outcome rather than an error.
//! Enabling can time out too, before the first probe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, PagesError};
use crate::github::{GitHubApi, pages_url};
use crate::retry::{RetryPolicy, with_backoff};
use crate::types::{PagesStatus, RepositoryHandle};

#[derive(Debug, Clone)]
pub struct PagesConfig {
    /// Wall-clock budget from enabling to giving up.
    pub deadline: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Directory of the branch Pages serves from.
    pub source_path: String,
    /// Bound on a single probe request.
    pub probe_timeout: Duration,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(180),
            poll_interval: Duration::from_secs(3),
            max_attempts: 60,
            source_path: "/".to_string(),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

// ── Probing ────────────────────────────────────────────────────────────

/// What one liveness check saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The server answered with this status.
    Responded(u16),
    /// DNS, connect or TLS failure.
    Unreachable(String),
}

impl ProbeResult {
    /// Any non-error answer counts; what the page contains is not checked.
    pub fn is_live(&self) -> bool {
        matches!(self, ProbeResult::Responded(status) if *status < 400)
    }
}

/// One HTTP check against the public site URL.
#[async_trait]
pub trait PageProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

/// Probe backed by a plain `GET`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pagesmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl PageProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        match self.http.get(url).send().await {
            Ok(resp) => ProbeResult::Responded(resp.status().as_u16()),
            Err(e) => ProbeResult::Unreachable(e.to_string()),
        }
    }
}

// ── Activation ─────────────────────────────────────────────────────────

/// Terminal result of a Pages wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagesOutcome {
    pub url: String,
    pub status: PagesStatus,
}

pub struct PagesActivator {
    api: Arc<dyn GitHubApi>,
    probe: Arc<dyn PageProbe>,
    retry: RetryPolicy,
    config: PagesConfig,
}

impl PagesActivator {
    pub fn new(api: Arc<dyn GitHubApi>, probe: Arc<dyn PageProbe>, retry: RetryPolicy, config: PagesConfig) -> Self {
        Self {
            api,
            probe,
            retry,
            config,
        }
    }

    /// Enable Pages for `handle` and wait for the site to answer.
    ///
    /// Cancelling `cancel` abandons the wait only; the repository and its
    /// commit are already in place by the time this runs.
    pub async fn activate(
        &self,
        handle: &RepositoryHandle,
        cancel: &CancellationToken,
    ) -> Result<PagesOutcome, PagesError> {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let mut status = PagesStatus::Disabled;

        self.advance(&mut status, PagesStatus::Enabling, handle);
        let enabled = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(self.cancelled(pages_url(&handle.owner, &handle.name), 0));
            }
            enabled = tokio::time::timeout_at(deadline, self.enable(handle)) => enabled,
        };
        let url = match enabled {
            Ok(url) => url?,
            Err(_) => {
                let waited = started.elapsed();
                tracing::warn!(repo = %handle.full_name(), waited = ?waited, "Pages enable did not finish before the deadline");
                let timed_out = PagesStatus::TimedOut {
                    attempts: 0,
                    waited_ms: millis(waited),
                };
                self.advance(&mut status, timed_out, handle);
                return Ok(PagesOutcome {
                    url: pages_url(&handle.owner, &handle.name),
                    status,
                });
            }
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.advance(&mut status, PagesStatus::Polling { attempts }, handle);

            let probed = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(self.cancelled(url, attempts - 1));
                }
                probed = tokio::time::timeout_at(deadline, self.probe.probe(&url)) => probed,
            };

            match probed {
                Ok(result) if result.is_live() => {
                    let latency = started.elapsed();
                    let live = PagesStatus::Live {
                        attempts,
                        latency_ms: millis(latency),
                        live_at: Utc::now(),
                    };
                    tracing::info!(url = %url, attempts, latency = ?latency, "Pages site is live");
                    self.advance(&mut status, live, handle);
                    return Ok(PagesOutcome { url, status });
                }
                Ok(result) => {
                    tracing::debug!(url = %url, attempt = attempts, result = ?result, "Pages site not live yet");
                }
                // The probe was still in flight when the deadline passed.
                Err(_) => break,
            }

            if attempts >= self.config.max_attempts {
                break;
            }
            let next = Instant::now() + self.config.poll_interval;
            if next > deadline {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(self.cancelled(url, attempts));
                }
                () = tokio::time::sleep_until(next) => {}
            }
        }

        let waited = started.elapsed();
        tracing::warn!(url = %url, attempts, waited = ?waited, "Pages site not live within bounds");
        let timed_out = PagesStatus::TimedOut {
            attempts,
            waited_ms: millis(waited),
        };
        self.advance(&mut status, timed_out, handle);
        Ok(PagesOutcome { url, status })
    }

    /// Issue the enable call; an already-enabled site is not an error.
    ///
    /// GitHub answers `409` for an existing site but `422` for a bad source
    /// branch or path, and both arrive as [`ApiError::Conflict`]. A conflict
    /// only counts as "already enabled" when the site can then be read back.
    async fn enable(&self, handle: &RepositoryHandle) -> Result<String, PagesError> {
        let (owner, repo) = (handle.owner.as_str(), handle.name.as_str());
        let enabled = with_backoff(&self.retry, "pages enable", || {
            self.api
                .enable_pages(owner, repo, &handle.default_branch, &self.config.source_path)
        })
        .await;

        let site = match enabled {
            Ok(site) => {
                tracing::info!(repo = %handle.full_name(), "Pages enabled");
                site
            }
            Err(conflict @ ApiError::Conflict { .. }) => {
                match with_backoff(&self.retry, "pages lookup", || self.api.get_pages(owner, repo)).await {
                    Ok(site) => {
                        tracing::info!(repo = %handle.full_name(), "Pages already enabled");
                        site
                    }
                    Err(e) => {
                        tracing::warn!(repo = %handle.full_name(), error = %e, "No Pages site behind the enable conflict");
                        return Err(PagesError::Enable(conflict));
                    }
                }
            }
            Err(e) => return Err(PagesError::Enable(e)),
        };

        Ok(site.html_url.unwrap_or_else(|| pages_url(owner, repo)))
    }

    fn advance(&self, status: &mut PagesStatus, next: PagesStatus, handle: &RepositoryHandle) {
        debug_assert!(status.can_advance_to(&next), "{status:?} -> {next:?}");
        tracing::debug!(repo = %handle.full_name(), from = ?status, to = ?next, "Pages state");
        *status = next;
    }

    fn cancelled(&self, url: String, attempts: u32) -> PagesError {
        tracing::warn!(url = %url, attempts, "Pages wait cancelled");
        PagesError::Cancelled { url, attempts }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
