//! Idempotent create-or-reuse of the target repository.

use std::sync::Arc;

use crate::error::{ApiError, ProvisioningError};
use crate::github::{GitHubApi, NewRepo, RepoInfo};
use crate::retry::{RetryPolicy, with_backoff};
use crate::types::RepositoryHandle;

/// GitHub caps repository names at 100 characters.
const MAX_NAME_LEN: usize = 100;

/// Settings applied when a repository has to be created.
#[derive(Debug, Clone, Default)]
pub struct ProvisionConfig {
    pub private: bool,
    pub description: Option<String>,
    /// The owner is an organization rather than the token's user.
    pub organization: bool,
}

/// Derive the repository name for a task: `prefix` + the task id reduced
/// to GitHub's allowed characters.
pub fn repository_name(prefix: &str, task: &str) -> Result<String, ProvisioningError> {
    let mut slug = String::with_capacity(task.len());
    for c in task.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches(|c| c == '-' || c == '.');
    if slug.is_empty() {
        return Err(ProvisioningError::InvalidName(task.to_string()));
    }
    let mut name = format!("{prefix}{slug}");
    if name.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    Ok(name)
}

/// Looks a repository up and creates it only when it is absent.
///
/// An existing repository is returned untouched: no reset of history,
/// settings or visibility. Two concurrent callers for the same name both
/// end up with the same handle, since a lost create race (`409`/`422`)
/// falls back to a second lookup.
pub struct RepositoryProvisioner {
    api: Arc<dyn GitHubApi>,
    retry: RetryPolicy,
    config: ProvisionConfig,
}

impl RepositoryProvisioner {
    pub fn new(api: Arc<dyn GitHubApi>, retry: RetryPolicy, config: ProvisionConfig) -> Self {
        Self { api, retry, config }
    }

    pub async fn ensure(&self, owner: &str, name: &str) -> Result<RepositoryHandle, ProvisioningError> {
        let (info, existed) = match self.lookup(owner, name).await? {
            Some(info) => (info, true),
            None => match self.create(owner, name).await {
                Ok(info) => (info, false),
                Err(ProvisioningError::Api(e)) if e.is_conflict() => {
                    tracing::info!(repo = %name, "Repository appeared concurrently, reusing it");
                    let info = self
                        .lookup(owner, name)
                        .await?
                        .ok_or(ProvisioningError::Api(e))?;
                    (info, true)
                }
                Err(e) => return Err(e),
            },
        };

        if !info.owner.login.eq_ignore_ascii_case(owner) {
            return Err(ProvisioningError::OwnerMismatch {
                name: name.to_string(),
                expected: owner.to_string(),
                actual: info.owner.login,
            });
        }

        let handle = RepositoryHandle {
            owner: info.owner.login,
            name: info.name,
            default_branch: info.default_branch,
            existed,
            html_url: info.html_url,
            private: info.private,
        };
        tracing::info!(
            repo = %handle.full_name(),
            existed = handle.existed,
            branch = %handle.default_branch,
            "Repository ready"
        );
        Ok(handle)
    }

    async fn lookup(&self, owner: &str, name: &str) -> Result<Option<RepoInfo>, ProvisioningError> {
        let found = with_backoff(&self.retry, "repository lookup", || self.api.get_repo(owner, name)).await;
        match found {
            Ok(info) => Ok(Some(info)),
            Err(ApiError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, owner: &str, name: &str) -> Result<RepoInfo, ProvisioningError> {
        // `/user/repos` creates under the token's account whatever `owner` says.
        if !self.config.organization {
            let user = with_backoff(&self.retry, "user lookup", || self.api.authenticated_user()).await?;
            if !user.login.eq_ignore_ascii_case(owner) {
                return Err(ProvisioningError::OwnerMismatch {
                    name: name.to_string(),
                    expected: owner.to_string(),
                    actual: user.login,
                });
            }
        }
        let new = NewRepo {
            owner: owner.to_string(),
            name: name.to_string(),
            private: self.config.private,
            description: self.config.description.clone(),
            organization: self.config.organization,
        };
        tracing::info!(repo = %format!("{owner}/{name}"), private = new.private, "Creating repository");
        let info = with_backoff(&self.retry, "repository create", || self.api.create_repo(&new)).await?;
        Ok(info)
    }
}
