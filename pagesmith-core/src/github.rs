//! GitHub REST API surface used by the pipeline.
//!
//! Writes go through the Git Data API (blobs, trees, commits, refs) so a
//! commit is assembled remotely and only becomes visible when the branch
//! ref moves. There is no local clone or working tree.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Repository metadata as returned by `GET /repos/{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub owner: Owner,
    pub default_branch: String,
    pub html_url: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Owner {
    pub login: String,
}

/// Parameters for creating a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepo {
    pub owner: String,
    pub name: String,
    pub private: bool,
    pub description: Option<String>,
    /// Create under `/orgs/{owner}/repos` instead of `/user/repos`.
    pub organization: bool,
}

/// Tip of a branch: commit id, the tree it points at and when it was
/// committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHead {
    pub commit_sha: String,
    pub tree_sha: String,
    pub committed_at: DateTime<Utc>,
}

/// One file in a tree to be created on top of a base tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sha: String,
}

impl TreeEntry {
    pub fn blob(path: &str, sha: String) -> Self {
        Self {
            path: path.to_string(),
            mode: "100644",
            kind: "blob",
            sha,
        }
    }
}

/// A configured Pages site.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PagesSite {
    pub html_url: Option<String>,
    pub status: Option<String>,
}

/// The subset of GitHub the pipeline talks to.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// The account the token acts as.
    async fn authenticated_user(&self) -> Result<Owner, ApiError>;

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo, ApiError>;

    async fn create_repo(&self, new: &NewRepo) -> Result<RepoInfo, ApiError>;

    async fn get_branch_head(&self, owner: &str, repo: &str, branch: &str) -> Result<BranchHead, ApiError>;

    /// Upload one UTF-8 file body, returning its blob id.
    async fn create_blob(&self, owner: &str, repo: &str, content: &str) -> Result<String, ApiError>;

    /// Create a tree layered over `base_tree`, returning its id.
    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: Option<&str>,
        entries: &[TreeEntry],
    ) -> Result<String, ApiError>;

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, ApiError>;

    /// Move `refs/heads/{branch}` to `sha`. Without `force` a
    /// non-fast-forward update fails with [`ApiError::Conflict`].
    async fn update_ref(&self, owner: &str, repo: &str, branch: &str, sha: &str, force: bool) -> Result<(), ApiError>;

    /// Enable Pages from `branch` at `path`. An already configured site
    /// answers with [`ApiError::Conflict`].
    async fn enable_pages(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<PagesSite, ApiError>;

    async fn get_pages(&self, owner: &str, repo: &str) -> Result<PagesSite, ApiError>;
}

// ── REST client ────────────────────────────────────────────────────────

/// Token-authenticated GitHub REST client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

#[derive(Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Deserialize)]
struct BranchCommit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    tree: ShaOnly,
    committer: Signature,
}

#[derive(Deserialize)]
struct Signature {
    date: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl GitHubClient {
    pub fn new(token: String) -> Result<Self, ApiError> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: String, api_base: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pagesmith/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Transport {
                resource: "client".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Send a request and decode a JSON body, classifying failures.
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, resource: &str) -> Result<T, ApiError> {
        let resp = self.send_raw(req, resource).await?;
        resp.json::<T>().await.map_err(|e| ApiError::Decode {
            resource: resource.to_string(),
            message: e.to_string(),
        })
    }

    async fn send_raw(&self, req: reqwest::RequestBuilder, resource: &str) -> Result<reqwest::Response, ApiError> {
        let resp = req.send().await.map_err(|e| ApiError::Transport {
            resource: resource.to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let headers = resp.headers().clone();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);
        let retry_after = header("retry-after")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let exhausted = header("x-ratelimit-remaining").as_deref() == Some("0");

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);

        tracing::debug!(status = status.as_u16(), resource, %message, "GitHub API error");

        if status.as_u16() == 429 || (status.as_u16() == 403 && (exhausted || retry_after.is_some())) {
            return Err(ApiError::RateLimited {
                resource: resource.to_string(),
                retry_after,
            });
        }
        Err(ApiError::from_status(status.as_u16(), resource, message))
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn authenticated_user(&self) -> Result<Owner, ApiError> {
        let req = self.request(reqwest::Method::GET, "/user");
        self.send(req, "authenticated user").await
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo, ApiError> {
        let req = self.request(reqwest::Method::GET, &format!("/repos/{owner}/{repo}"));
        self.send(req, &format!("repository {owner}/{repo}")).await
    }

    async fn create_repo(&self, new: &NewRepo) -> Result<RepoInfo, ApiError> {
        let path = if new.organization {
            format!("/orgs/{}/repos", new.owner)
        } else {
            "/user/repos".to_string()
        };
        let body = serde_json::json!({
            "name": new.name,
            "private": new.private,
            "description": new.description,
            "auto_init": true,
            "has_issues": false,
            "has_wiki": false,
        });
        let req = self.request(reqwest::Method::POST, &path).json(&body);
        self.send(req, &format!("repository {}/{}", new.owner, new.name)).await
    }

    async fn get_branch_head(&self, owner: &str, repo: &str, branch: &str) -> Result<BranchHead, ApiError> {
        let req = self.request(
            reqwest::Method::GET,
            &format!("/repos/{owner}/{repo}/branches/{branch}"),
        );
        let resp: BranchResponse = self.send(req, &format!("branch {branch}")).await?;
        Ok(BranchHead {
            commit_sha: resp.commit.sha,
            tree_sha: resp.commit.commit.tree.sha,
            committed_at: resp.commit.commit.committer.date,
        })
    }

    async fn create_blob(&self, owner: &str, repo: &str, content: &str) -> Result<String, ApiError> {
        let req = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{repo}/git/blobs"))
            .json(&serde_json::json!({ "content": content, "encoding": "utf-8" }));
        let blob: ShaOnly = self.send(req, "blob").await?;
        Ok(blob.sha)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: Option<&str>,
        entries: &[TreeEntry],
    ) -> Result<String, ApiError> {
        let mut body = serde_json::json!({ "tree": entries });
        if let Some(base) = base_tree {
            body["base_tree"] = serde_json::Value::String(base.to_string());
        }
        let req = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{repo}/git/trees"))
            .json(&body);
        let tree: ShaOnly = self.send(req, "tree").await?;
        Ok(tree.sha)
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, ApiError> {
        let req = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{repo}/git/commits"))
            .json(&serde_json::json!({
                "message": message,
                "tree": tree,
                "parents": parents,
            }));
        let commit: ShaOnly = self.send(req, "commit").await?;
        Ok(commit.sha)
    }

    async fn update_ref(&self, owner: &str, repo: &str, branch: &str, sha: &str, force: bool) -> Result<(), ApiError> {
        let req = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{owner}/{repo}/git/refs/heads/{branch}"),
            )
            .json(&serde_json::json!({ "sha": sha, "force": force }));
        self.send_raw(req, &format!("ref heads/{branch}")).await?;
        Ok(())
    }

    async fn enable_pages(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<PagesSite, ApiError> {
        let req = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{repo}/pages"))
            .json(&serde_json::json!({ "source": { "branch": branch, "path": path } }));
        self.send(req, "pages").await
    }

    async fn get_pages(&self, owner: &str, repo: &str) -> Result<PagesSite, ApiError> {
        let req = self.request(reqwest::Method::GET, &format!("/repos/{owner}/{repo}/pages"));
        self.send(req, "pages").await
    }
}

/// Public URL GitHub Pages serves a repository at.
pub fn pages_url(owner: &str, repo: &str) -> String {
    let host = format!("{}.github.io", owner.to_ascii_lowercase());
    if repo.eq_ignore_ascii_case(&host) {
        format!("https://{host}/")
    } else {
        format!("https://{host}/{repo}/")
    }
}
