//! Publish an assembled file set as a single commit.
//!
//! Order of operations:
//!
//! 1. upload every file as a blob (each retried on its own);
//! 2. read the branch tip;
//! 3. create a tree on top of the tip's tree;
//! 4. create a commit whose parent is the tip;
//! 5. move the branch ref, fast-forward only.
//!
//! The branch is touched only in step 5, so any failure before it leaves
//! the branch exactly where it was. If the ref moved underneath us the
//! tree and commit are rebuilt on the new tip; if the new tip already
//! carries identical content it is reused instead of stacking an empty
//! commit on top.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{ApiError, PublishError};
use crate::github::{BranchHead, GitHubApi, TreeEntry};
use crate::retry::{RetryPolicy, with_backoff};
use crate::types::{AssembledFileSet, CommitResult, GenerationRequest, RepositoryHandle};

/// Commit message for one request; the trailers tie a commit back to the
/// request that produced it.
pub fn commit_message(request: &GenerationRequest) -> String {
    format!(
        "Round {} update\n\nTask: {}\nNonce: {}\n",
        request.round, request.task, request.nonce
    )
}

pub struct CommitPublisher {
    api: Arc<dyn GitHubApi>,
    retry: RetryPolicy,
}

impl CommitPublisher {
    pub fn new(api: Arc<dyn GitHubApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    pub async fn publish(
        &self,
        handle: &RepositoryHandle,
        files: &AssembledFileSet,
        message: &str,
    ) -> Result<CommitResult, PublishError> {
        if files.is_empty() {
            return Err(PublishError::EmptyFileSet);
        }
        let (owner, repo) = (handle.owner.as_str(), handle.name.as_str());
        let branch = handle.default_branch.as_str();

        let entries = self.upload_blobs(handle, files).await?;
        tracing::debug!(repo = %handle.full_name(), blobs = entries.len(), "Blobs uploaded");

        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let head = self.branch_head(handle).await?;

            let tree = with_backoff(&self.retry, "tree create", || {
                self.api.create_tree(owner, repo, Some(&head.tree_sha), &entries)
            })
            .await
            .map_err(|source| PublishError::Api {
                step: "create tree",
                source,
            })?;

            if tree == head.tree_sha {
                tracing::info!(
                    repo = %handle.full_name(),
                    sha = %head.commit_sha,
                    "Branch already holds this content, reusing tip"
                );
                return Ok(CommitResult {
                    sha: head.commit_sha,
                    branch: branch.to_string(),
                    timestamp: head.committed_at,
                    pushed: false,
                });
            }

            let parents = [head.commit_sha.clone()];
            let sha = with_backoff(&self.retry, "commit create", || {
                self.api.create_commit(owner, repo, message, &tree, &parents)
            })
            .await
            .map_err(|source| PublishError::Api {
                step: "create commit",
                source,
            })?;

            let moved = with_backoff(&self.retry, "ref update", || {
                self.api.update_ref(owner, repo, branch, &sha, false)
            })
            .await;

            match moved {
                Ok(()) => {
                    tracing::info!(
                        repo = %handle.full_name(),
                        branch,
                        sha = %sha,
                        files = files.len(),
                        "Commit published"
                    );
                    return Ok(CommitResult {
                        sha,
                        branch: branch.to_string(),
                        timestamp: Utc::now(),
                        pushed: true,
                    });
                }
                Err(ApiError::Conflict { message, .. }) => {
                    tracing::warn!(
                        repo = %handle.full_name(),
                        attempt,
                        reason = %message,
                        "Branch moved during publish, rebuilding on the new tip"
                    );
                }
                Err(source) => {
                    return Err(PublishError::Api {
                        step: "update ref",
                        source,
                    });
                }
            }
        }

        Err(PublishError::Contended {
            branch: branch.to_string(),
            attempts: max_attempts,
        })
    }

    async fn upload_blobs(
        &self,
        handle: &RepositoryHandle,
        files: &AssembledFileSet,
    ) -> Result<Vec<TreeEntry>, PublishError> {
        let mut entries = Vec::with_capacity(files.len());
        for (path, content) in files.iter() {
            let sha = with_backoff(&self.retry, "blob upload", || {
                self.api.create_blob(&handle.owner, &handle.name, content)
            })
            .await
            .map_err(|source| PublishError::Blob {
                path: path.to_string(),
                source,
            })?;
            entries.push(TreeEntry::blob(path, sha));
        }
        Ok(entries)
    }

    /// Tip of the default branch. A repository created moments ago may not
    /// expose its initial branch yet, so a missing branch is retried there.
    async fn branch_head(&self, handle: &RepositoryHandle) -> Result<BranchHead, PublishError> {
        let branch = handle.default_branch.as_str();
        with_backoff(&self.retry, "branch lookup", || async move {
            self.api
                .get_branch_head(&handle.owner, &handle.name, branch)
                .await
                .map_err(|source| match source {
                    ApiError::NotFound { .. } => PublishError::MissingBranch {
                        branch: branch.to_string(),
                        fresh: !handle.existed,
                    },
                    source => PublishError::Api {
                        step: "read branch",
                        source,
                    },
                })
        })
        .await
    }
}
