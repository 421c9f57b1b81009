//! End-to-end pipeline runs against the in-memory GitHub, a scripted
//! generator and a scripted page probe.

use std::sync::Arc;
use std::time::Duration;

use pagesmith_core::fakes::{MemoryGitHub, ScriptedGenerator, ScriptedProbe};
use pagesmith_core::pages::ProbeResult;
use pagesmith_core::{
    ApiError, AttachmentSource, GenerationError, GenerationRequest, Outcome, OutcomeReporter,
    PagesConfig, PagesStatus, Pipeline, PipelineConfig, RetryPolicy, Stage,
};
use tokio_util::sync::CancellationToken;

const OWNER: &str = "octo";
const REPO: &str = "repo-timer";

fn request() -> GenerationRequest {
    GenerationRequest {
        email: "dev@example.com".into(),
        task: "timer".into(),
        round: 1,
        nonce: "nonce-1".into(),
        brief: "a single-page countdown timer".into(),
        attachments: vec![],
        checks: vec![],
        evaluation_url: None,
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        pages: PagesConfig {
            deadline: Duration::from_secs(60),
            poll_interval: Duration::from_secs(3),
            max_attempts: 60,
            ..PagesConfig::default()
        },
        ..PipelineConfig::new(OWNER)
    }
}

fn reporter() -> OutcomeReporter {
    let retry = RetryPolicy::default()
        .with_max_attempts(2)
        .with_initial_delay(Duration::from_millis(10));
    OutcomeReporter::new(retry, Duration::from_secs(2))
}

fn pipeline(
    github: Arc<MemoryGitHub>,
    generator: Arc<ScriptedGenerator>,
    probe: Arc<ScriptedProbe>,
) -> Pipeline {
    Pipeline::new(config(), generator, github, probe, reporter())
}

fn timer_site() -> Arc<ScriptedGenerator> {
    Arc::new(ScriptedGenerator::files(&[("index.html", "<h1>timer</h1>")]))
}

#[tokio::test(start_paused = true)]
async fn brief_becomes_a_live_site() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let probe = Arc::new(ScriptedProbe::new(
        vec![ProbeResult::Unreachable("dns".into()), ProbeResult::Responded(404)],
        ProbeResult::Responded(200),
    ));
    let run = pipeline(github.clone(), timer_site(), probe)
        .run(&request(), CancellationToken::new())
        .await;
    let report = run.report;

    assert_eq!(report.status, Outcome::Success);
    assert_eq!(report.stage, Stage::Complete);
    assert_eq!(report.repo_url.as_deref(), Some("https://github.com/octo/repo-timer"));
    assert_eq!(report.pages_url.as_deref(), Some("https://octo.github.io/repo-timer/"));
    assert!(report.live_at.is_some());
    assert!(report.error.is_none());
    assert!(run.delivery.is_none());

    let sha = report.commit_sha.unwrap();
    assert_eq!(github.branch_head(OWNER, REPO, "main"), Some(sha.clone()));
    assert_eq!(
        github.paths_at_head(OWNER, REPO, "main"),
        vec!["LICENSE", "README.md", "index.html"]
    );
    let message = github.commit_message(OWNER, REPO, &sha).unwrap();
    assert!(message.starts_with("Round 1 update"));
    assert!(message.contains("Nonce: nonce-1"));
    assert!(github.pages_enabled(OWNER, REPO));
}

#[tokio::test(start_paused = true)]
async fn page_that_never_resolves_is_a_partial_failure() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let run = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::unreachable()))
        .run(&request(), CancellationToken::new())
        .await;
    let report = run.report;

    assert_eq!(report.status, Outcome::PartialFailure);
    assert_eq!(report.stage, Stage::Pages);
    assert!(report.commit_sha.is_some());
    assert!(report.live_at.is_none());
    assert!(matches!(report.pages_status, Some(PagesStatus::TimedOut { .. })));
    assert!(github.branch_head(OWNER, REPO, "main").is_some());
}

#[tokio::test(start_paused = true)]
async fn resubmitting_the_same_request_is_idempotent() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let first = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::live()))
        .run(&request(), CancellationToken::new())
        .await
        .report;
    let second = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::live()))
        .run(&request(), CancellationToken::new())
        .await
        .report;

    assert_eq!(first.status, Outcome::Success);
    assert_eq!(second.status, Outcome::Success);
    assert_eq!(github.repo_count(), 1);
    assert_eq!(github.calls("create_repo"), 1);
    assert_eq!(first.commit_sha, second.commit_sha);
    assert!(second.repository.unwrap().existed);
    // initial commit plus one update
    assert_eq!(github.history_len(OWNER, REPO, "main"), 2);
}

#[tokio::test(start_paused = true)]
async fn next_round_updates_the_existing_repository() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::live()))
        .run(&request(), CancellationToken::new())
        .await;

    let round_two = GenerationRequest {
        round: 2,
        nonce: "nonce-2".into(),
        brief: "add a pause button".into(),
        ..request()
    };
    let generator = Arc::new(ScriptedGenerator::files(&[("index.html", "<h1>timer v2</h1>")]));
    let report = pipeline(github.clone(), generator, Arc::new(ScriptedProbe::live()))
        .run(&round_two, CancellationToken::new())
        .await
        .report;

    assert_eq!(report.status, Outcome::Success);
    assert_eq!(github.repo_count(), 1);
    assert_eq!(github.history_len(OWNER, REPO, "main"), 3);
    assert_eq!(
        github.file_at_head(OWNER, REPO, "main", "index.html").as_deref(),
        Some("<h1>timer v2</h1>")
    );
    let readme = github.file_at_head(OWNER, REPO, "main", "README.md").unwrap();
    assert!(readme.contains("round 2"));
}

#[tokio::test(start_paused = true)]
async fn blob_failure_mid_sequence_leaves_no_partial_commit() {
    let github = Arc::new(MemoryGitHub::new(OWNER).with_repo(OWNER, REPO, &[("index.html", "old")]));
    let before = github.branch_head(OWNER, REPO, "main");
    github.fail_blob_at(2, ApiError::from_status(401, "blob", "Bad credentials"));

    let report = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::live()))
        .run(&request(), CancellationToken::new())
        .await
        .report;

    assert_eq!(report.status, Outcome::Failure);
    assert_eq!(report.stage, Stage::Publish);
    assert!(report.commit_sha.is_none());
    assert!(report.repo_url.is_some());
    assert_eq!(github.branch_head(OWNER, REPO, "main"), before);
    assert_eq!(github.file_at_head(OWNER, REPO, "main", "index.html").as_deref(), Some("old"));
    assert_eq!(github.calls("update_ref"), 0);
    assert!(!github.pages_enabled(OWNER, REPO));
}

#[tokio::test(start_paused = true)]
async fn generation_failure_touches_nothing() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let generator = Arc::new(ScriptedGenerator::failing(GenerationError::Provider("overloaded".into())));
    let report = pipeline(github.clone(), generator, Arc::new(ScriptedProbe::live()))
        .run(&request(), CancellationToken::new())
        .await
        .report;

    assert_eq!(report.status, Outcome::Failure);
    assert_eq!(report.stage, Stage::Generation);
    assert!(report.error.unwrap().contains("overloaded"));
    assert_eq!(github.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_generation_is_a_failure() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let generator = Arc::new(ScriptedGenerator::files(&[]));
    let report = pipeline(github.clone(), generator, Arc::new(ScriptedProbe::live()))
        .run(&request(), CancellationToken::new())
        .await
        .report;

    assert_eq!(report.status, Outcome::Failure);
    assert_eq!(report.stage, Stage::Generation);
    assert_eq!(github.repo_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn corrupt_attachment_is_reported_but_not_fatal() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let generator = timer_site();
    let request = GenerationRequest {
        attachments: vec![
            AttachmentSource {
                name: "data.csv".into(),
                url: "data:text/csv;base64,YSxiCjEsMg==".into(),
            },
            AttachmentSource {
                name: "broken.png".into(),
                url: "data:image/png;base64,***".into(),
            },
        ],
        ..request()
    };
    let report = pipeline(github, generator.clone(), Arc::new(ScriptedProbe::live()))
        .run(&request, CancellationToken::new())
        .await
        .report;

    assert_eq!(report.status, Outcome::Success);
    assert_eq!(report.attachment_errors.len(), 1);
    assert!(report.attachment_errors[0].contains("broken.png"));
    assert_eq!(generator.seen_attachments(), vec![vec!["data.csv".to_string()]]);
}

#[tokio::test(start_paused = true)]
async fn generated_license_survives_assembly() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let generator = Arc::new(ScriptedGenerator::files(&[
        ("index.html", "<p>x</p>"),
        ("LICENSE", "Custom terms"),
    ]));
    pipeline(github.clone(), generator, Arc::new(ScriptedProbe::live()))
        .run(&request(), CancellationToken::new())
        .await;

    assert_eq!(
        github.file_at_head(OWNER, REPO, "main", "LICENSE").as_deref(),
        Some("Custom terms")
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_for_one_nonce_converge() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let a = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::live()));
    let b = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::live()));
    let req = request();

    let (ra, rb) = tokio::join!(
        a.run(&req, CancellationToken::new()),
        b.run(&req, CancellationToken::new())
    );

    assert_eq!(ra.report.status, Outcome::Success);
    assert_eq!(rb.report.status, Outcome::Success);
    assert_eq!(github.repo_count(), 1);
    let head = github.branch_head(OWNER, REPO, "main").unwrap();
    let shas = [ra.report.commit_sha.unwrap(), rb.report.commit_sha.unwrap()];
    assert!(shas.contains(&head));
    assert_eq!(github.history_len(OWNER, REPO, "main"), 2);
    assert_eq!(
        github.file_at_head(OWNER, REPO, "main", "index.html").as_deref(),
        Some("<h1>timer</h1>")
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_wait_keeps_the_commit() {
    let github = Arc::new(MemoryGitHub::new(OWNER));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        trigger.cancel();
    });

    let report = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::unreachable()))
        .run(&request(), cancel)
        .await
        .report;

    assert_eq!(report.status, Outcome::PartialFailure);
    assert_eq!(report.stage, Stage::Pages);
    assert!(report.error.unwrap().contains("cancelled"));
    assert!(report.commit_sha.is_some());
    assert_eq!(report.pages_status, Some(PagesStatus::Polling { attempts: 2 }));
    assert!(github.branch_head(OWNER, REPO, "main").is_some());
}

#[tokio::test]
async fn undeliverable_report_does_not_change_the_outcome() {
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let github = Arc::new(MemoryGitHub::new(OWNER));
    let request = GenerationRequest {
        evaluation_url: Some(format!("http://{addr}/notify")),
        ..request()
    };
    let run = pipeline(github.clone(), timer_site(), Arc::new(ScriptedProbe::live()))
        .run(&request, CancellationToken::new())
        .await;

    assert_eq!(run.report.status, Outcome::Success);
    let delivery = run.delivery.unwrap().unwrap_err();
    assert_eq!(delivery.attempts, 2);
    assert!(github.branch_head(OWNER, REPO, "main").is_some());
}
