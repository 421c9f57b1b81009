//! HTTP endpoint tests against a real listener with in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::post;
use pagesmith_core::fakes::{MemoryGitHub, ScriptedGenerator, ScriptedProbe};
use pagesmith_core::{GenerationError, OutcomeReporter, Pipeline, PipelineConfig, RetryPolicy};
use pagesmith_server::web::{AppState, router};
use serde_json::{Value, json};
use tokio::sync::mpsc;

const SECRET: &str = "s3cret";

struct Harness {
    base: String,
    github: Arc<MemoryGitHub>,
    generator: Arc<ScriptedGenerator>,
}

async fn start(generator: ScriptedGenerator) -> Harness {
    let github = Arc::new(MemoryGitHub::new("octo"));
    let generator = Arc::new(generator);
    let reporter = OutcomeReporter::new(
        RetryPolicy::default().with_max_attempts(2).with_initial_delay(Duration::from_millis(10)),
        Duration::from_secs(2),
    );
    let pipeline = Pipeline::new(
        PipelineConfig::new("octo"),
        generator.clone(),
        github.clone(),
        Arc::new(ScriptedProbe::live()),
        reporter,
    );
    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        secret: SECRET.to_string(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });
    Harness {
        base: format!("http://{addr}"),
        github,
        generator,
    }
}

fn timer_site() -> ScriptedGenerator {
    ScriptedGenerator::files(&[("index.html", "<h1>timer</h1>")])
}

fn task(secret: &str) -> Value {
    json!({
        "secret": secret,
        "email": "dev@example.com",
        "task": "timer",
        "round": 1,
        "nonce": "n-1",
        "brief": "a single-page countdown timer",
        "attachments": []
    })
}

async fn submit(base: &str, body: &Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{base}/api-endpoint"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn health_answers_ok() {
    let h = start(timer_site()).await;
    let body = reqwest::get(format!("{}/health", h.base)).await.unwrap().text().await.unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn wrong_secret_is_rejected_without_side_effects() {
    let h = start(timer_site()).await;
    let (status, body) = submit(&h.base, &task("wrong")).await;

    assert_eq!(status, 401);
    assert_eq!(body["status"], "rejected");
    assert_eq!(h.github.total_calls(), 0);
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let h = start(timer_site()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api-endpoint", h.base))
        .header("content-type", "application/json")
        .body("{\"secret\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(h.github.total_calls(), 0);
}

#[tokio::test]
async fn missing_field_is_bad_request() {
    let h = start(timer_site()).await;
    let mut body = task(SECRET);
    body.as_object_mut().unwrap().remove("nonce");
    let (status, body) = submit(&h.base, &body).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("nonce"));
}

#[tokio::test]
async fn valid_request_deploys_and_reports() {
    let h = start(timer_site()).await;
    let (status, body) = submit(&h.base, &task(SECRET)).await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    assert_eq!(body["repo_url"], "https://github.com/octo/repo-timer");
    assert_eq!(body["pages_url"], "https://octo.github.io/repo-timer/");
    assert!(body["commit_sha"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(body["live_at"].is_string());
    assert!(body.get("delivery").is_none());
    assert_eq!(
        h.github.branch_head("octo", "repo-timer", "main").as_deref(),
        body["commit_sha"].as_str()
    );
}

#[tokio::test]
async fn generation_failure_is_bad_gateway() {
    let h = start(ScriptedGenerator::failing(GenerationError::Provider("overloaded".into()))).await;
    let (status, body) = submit(&h.base, &task(SECRET)).await;

    assert_eq!(status, 502);
    assert_eq!(body["status"], "failure");
    assert_eq!(body["stage"], "generation");
    assert!(body["commit_sha"].is_null());
    assert_eq!(h.github.repo_count(), 0);
}

#[tokio::test]
async fn report_is_posted_to_the_evaluation_url() {
    let (tx, mut rx) = mpsc::channel::<Value>(4);
    let sink = Router::new().route(
        "/notify",
        post(move |axum::Json(body): axum::Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body).await;
                "ok"
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sink_addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, sink).await.unwrap() });

    let h = start(timer_site()).await;
    let mut body = task(SECRET);
    body["evaluation_url"] = json!(format!("http://{sink_addr}/notify"));
    let (status, response) = submit(&h.base, &body).await;
    assert_eq!(status, 200);

    let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered["nonce"], "n-1");
    assert_eq!(delivered["email"], "dev@example.com");
    assert_eq!(delivered["commit_sha"], response["commit_sha"]);
    assert_eq!(delivered["status"], "success");
    assert_eq!(response["delivery"], json!({"delivered": true}));
}

#[tokio::test]
async fn undelivered_report_is_visible_in_the_response() {
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = closed.local_addr().unwrap();
    drop(closed);

    let h = start(timer_site()).await;
    let mut body = task(SECRET);
    body["evaluation_url"] = json!(format!("http://{dead_addr}/notify"));
    let (status, response) = submit(&h.base, &body).await;

    assert_eq!(status, 200);
    assert_eq!(response["status"], "success");
    assert_eq!(response["delivery"]["delivered"], false);
    assert_eq!(response["delivery"]["attempts"], 2);
    assert!(response["delivery"]["error"].as_str().is_some_and(|e| e.contains("notify")));
}
