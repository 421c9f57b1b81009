//! Delivery of the evaluation report to the caller's webhook.

use std::time::Duration;

use crate::error::{DeliveryAttemptError, DeliveryError};
use crate::retry::{RetryPolicy, with_backoff};
use crate::types::EvaluationReport;

/// Posts an [`EvaluationReport`] as JSON, retrying transient failures.
///
/// A 2xx answer ends delivery. 429, 5xx and transport failures are
/// retried up to the policy's ceiling; any other status is final.
#[derive(Debug, Clone)]
pub struct OutcomeReporter {
    http: reqwest::Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl OutcomeReporter {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            retry,
            timeout,
        }
    }

    pub async fn report(&self, url: &str, report: &EvaluationReport) -> Result<(), DeliveryError> {
        let mut attempts = 0u32;
        let delivered = with_backoff(&self.retry, "report delivery", || {
            attempts += 1;
            self.post(url, report)
        })
        .await;

        match delivered {
            Ok(()) => {
                tracing::info!(url = %url, attempts, status = ?report.status, "Report delivered");
                Ok(())
            }
            Err(last) => {
                let err = DeliveryError {
                    url: url.to_string(),
                    attempts,
                    last,
                };
                tracing::error!(error = %err, "Report not delivered");
                Err(err)
            }
        }
    }

    async fn post(&self, url: &str, report: &EvaluationReport) -> Result<(), DeliveryAttemptError> {
        let resp = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(report)
            .send()
            .await
            .map_err(|e| DeliveryAttemptError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryAttemptError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::*;
    use crate::types::GenerationRequest;

    #[derive(Default)]
    struct Sink {
        hits: AtomicU32,
        /// Statuses to answer with, in order; 200 once exhausted.
        script: Vec<u16>,
        bodies: Mutex<Vec<Value>>,
    }

    async fn receive(State(sink): State<Arc<Sink>>, axum::Json(body): axum::Json<Value>) -> StatusCode {
        let n = sink.hits.fetch_add(1, Ordering::SeqCst) as usize;
        sink.bodies.lock().await.push(body);
        let code = sink.script.get(n).copied().unwrap_or(200);
        StatusCode::from_u16(code).unwrap()
    }

    async fn start_sink(script: Vec<u16>) -> (String, Arc<Sink>) {
        let sink = Arc::new(Sink {
            script,
            ..Sink::default()
        });
        let app = Router::new().route("/notify", post(receive)).with_state(sink.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/notify"), sink)
    }

    fn report() -> EvaluationReport {
        let mut report = EvaluationReport::begin(&GenerationRequest {
            email: "dev@example.com".into(),
            task: "timer".into(),
            round: 1,
            nonce: "n-1".into(),
            brief: "timer".into(),
            attachments: vec![],
            checks: vec![],
            evaluation_url: None,
        });
        report.finish();
        report
    }

    fn reporter() -> OutcomeReporter {
        let retry = RetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10));
        OutcomeReporter::new(retry, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn delivers_once_on_success() {
        let (url, sink) = start_sink(vec![]).await;
        reporter().report(&url, &report()).await.unwrap();
        assert_eq!(sink.hits.load(Ordering::SeqCst), 1);
        let bodies = sink.bodies.lock().await;
        assert_eq!(bodies[0]["task"], "timer");
        assert_eq!(bodies[0]["nonce"], "n-1");
        assert_eq!(bodies[0]["status"], "failure");
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (url, sink) = start_sink(vec![500, 503]).await;
        reporter().report(&url, &report()).await.unwrap();
        assert_eq!(sink.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_final() {
        let (url, sink) = start_sink(vec![400]).await;
        let err = reporter().report(&url, &report()).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last, DeliveryAttemptError::Status(400));
        assert_eq!(sink.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_the_ceiling() {
        let (url, sink) = start_sink(vec![502, 502, 502, 502]).await;
        let err = reporter().report(&url, &report()).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, DeliveryAttemptError::Status(502));
        assert_eq!(sink.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);
        let err = reporter()
            .report(&format!("http://{addr}/notify"), &report())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last, DeliveryAttemptError::Transport(_)));
    }
}
