//! REST client against a local stand-in for api.github.com.

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use pagesmith_core::github::{GitHubApi, GitHubClient, NewRepo, TreeEntry};
use pagesmith_core::{ApiError, Retryable};
use serde_json::json;

async fn start() -> GitHubClient {
    let app = Router::new()
        .route(
            "/repos/octo/missing",
            get(|| async { (StatusCode::NOT_FOUND, axum::Json(json!({"message": "Not Found"}))) }),
        )
        .route(
            "/repos/octo/limited",
            get(|| async {
                let mut headers = HeaderMap::new();
                headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
                headers.insert("retry-after", "7".parse().unwrap());
                (StatusCode::FORBIDDEN, headers, "API rate limit exceeded").into_response()
            }),
        )
        .route(
            "/repos/octo/secret",
            get(|| async { (StatusCode::FORBIDDEN, axum::Json(json!({"message": "Resource not accessible"}))) }),
        )
        .route(
            "/user",
            get(|| async { axum::Json(json!({"login": "octo", "id": 1, "type": "User"})) }),
        )
        .route(
            "/user/repos",
            post(|headers: HeaderMap, axum::Json(body): axum::Json<serde_json::Value>| async move {
                assert_eq!(headers["authorization"], "Bearer t0ken");
                assert_eq!(body["auto_init"], true);
                axum::Json(json!({
                    "name": body["name"],
                    "owner": {"login": "octo"},
                    "default_branch": "main",
                    "html_url": format!("https://github.com/octo/{}", body["name"].as_str().unwrap()),
                    "private": body["private"]
                }))
            }),
        )
        .route(
            "/repos/octo/timer/branches/main",
            get(|| async {
                axum::Json(json!({
                    "name": "main",
                    "commit": {
                        "sha": "c1",
                        "commit": {
                            "tree": {"sha": "t1"},
                            "committer": {"name": "octo", "date": "2025-03-01T12:00:00Z"}
                        }
                    }
                }))
            }),
        )
        .route(
            "/repos/octo/timer/git/trees",
            post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                assert_eq!(body["base_tree"], "t1");
                assert_eq!(body["tree"][0]["type"], "blob");
                (StatusCode::CREATED, axum::Json(json!({"sha": "t2"})))
            }),
        )
        .route(
            "/repos/octo/timer/git/refs/heads/main",
            patch(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    axum::Json(json!({"message": "Update is not a fast forward"})),
                )
            }),
        )
        .route(
            "/repos/octo/timer/pages",
            post(|| async { (StatusCode::CONFLICT, axum::Json(json!({"message": "already enabled"}))) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    GitHubClient::with_api_base("t0ken".into(), &format!("http://{addr}/")).unwrap()
}

#[tokio::test]
async fn missing_repository_is_not_found() {
    let client = start().await;
    let err = client.get_repo("octo", "missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn exhausted_rate_limit_is_transient() {
    let client = start().await;
    let err = client.get_repo("octo", "limited").await.unwrap_err();
    assert!(matches!(err, ApiError::RateLimited { .. }));
    assert!(err.is_transient());
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(7)));
}

#[tokio::test]
async fn plain_forbidden_is_permanent() {
    let client = start().await;
    let err = client.get_repo("octo", "secret").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Status {
            status: 403,
            resource: "repository octo/secret".into(),
            message: "Resource not accessible".into()
        }
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn reads_the_token_owner() {
    let client = start().await;
    assert_eq!(client.authenticated_user().await.unwrap().login, "octo");
}

#[tokio::test]
async fn creates_user_repository() {
    let client = start().await;
    let info = client
        .create_repo(&NewRepo {
            owner: "octo".into(),
            name: "repo-timer".into(),
            private: false,
            description: None,
            organization: false,
        })
        .await
        .unwrap();
    assert_eq!(info.html_url, "https://github.com/octo/repo-timer");
    assert_eq!(info.owner.login, "octo");
}

#[tokio::test]
async fn reads_branch_head_and_builds_tree() {
    let client = start().await;
    let head = client.get_branch_head("octo", "timer", "main").await.unwrap();
    assert_eq!((head.commit_sha.as_str(), head.tree_sha.as_str()), ("c1", "t1"));
    assert_eq!(head.committed_at.to_rfc3339(), "2025-03-01T12:00:00+00:00");

    let tree = client
        .create_tree("octo", "timer", Some(&head.tree_sha), &[TreeEntry::blob("index.html", "b1".into())])
        .await
        .unwrap();
    assert_eq!(tree, "t2");
}

#[tokio::test]
async fn non_fast_forward_is_a_conflict() {
    let client = start().await;
    let err = client.update_ref("octo", "timer", "main", "c2", false).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn pages_already_enabled_is_a_conflict() {
    let client = start().await;
    let err = client.enable_pages("octo", "timer", "main", "/").await.unwrap_err();
    assert!(err.is_conflict());
}
