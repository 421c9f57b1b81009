//! In-memory fakes for the pipeline's external collaborators (testing only).
//!
//! `MemoryGitHub` keeps repositories, content-addressed blobs and trees,
//! commits and branch refs in a mutex-guarded map and supports fault
//! injection. `ScriptedGenerator` and `ScriptedProbe` replay canned
//! answers for the LLM and the Pages URL.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{ApiError, GenerationError};
use crate::generate::CodeGenerator;
use crate::github::{BranchHead, GitHubApi, NewRepo, Owner, PagesSite, RepoInfo, TreeEntry};
use crate::pages::{PageProbe, ProbeResult};
use crate::types::{AttachmentRef, GeneratedFileSet, GenerationRequest};

fn digest(kind: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..20])
}

// ---------------------------------------------------------------------------
// MemoryGitHub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeCommit {
    tree: String,
    parents: Vec<String>,
    message: String,
    committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct FakeRepo {
    info: RepoInfo,
    blobs: HashMap<String, String>,
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, FakeCommit>,
    branches: HashMap<String, String>,
    pages: Option<PagesSite>,
}

impl FakeRepo {
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut queue = VecDeque::from([descendant.to_string()]);
        let mut seen = HashSet::new();
        while let Some(sha) = queue.pop_front() {
            if sha == ancestor {
                return true;
            }
            if !seen.insert(sha.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&sha) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        false
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Fail the Nth `create_blob` call (1-based, counted across repos).
    fail_blob_at: Option<(usize, ApiError)>,
    /// Per-operation budget of transient failures served before success.
    transient: HashMap<&'static str, u32>,
    /// Per-operation permanent failure.
    permanent: HashMap<&'static str, ApiError>,
}

#[derive(Debug, Default)]
struct State {
    repos: HashMap<String, FakeRepo>,
    calls: HashMap<&'static str, usize>,
    faults: Faults,
    commit_counter: u64,
}

/// In-memory GitHub backed by a `HashMap<full_name, repo>`.
#[derive(Debug)]
pub struct MemoryGitHub {
    login: String,
    state: Mutex<State>,
}

impl MemoryGitHub {
    /// A fake whose token belongs to `login`.
    pub fn new(login: &str) -> Self {
        Self {
            login: login.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Seed an existing repository whose `main` holds `files`.
    pub fn with_repo(self, owner: &str, name: &str, files: &[(&str, &str)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let mut repo = empty_repo(owner, name, false);
            let tree = insert_tree(&mut repo, None, files);
            let sha = insert_commit(&mut state.commit_counter, &mut repo, "Initial commit", tree, vec![]);
            repo.branches.insert("main".into(), sha);
            state.repos.insert(full_name(owner, name), repo);
        }
        self
    }

    /// Make the `nth` blob upload fail with `error`.
    pub fn fail_blob_at(&self, nth: usize, error: ApiError) {
        self.state.lock().unwrap().faults.fail_blob_at = Some((nth, error));
    }

    /// Serve `times` transient 502s from `op` before succeeding.
    pub fn fail_transiently(&self, op: &'static str, times: u32) {
        self.state.lock().unwrap().faults.transient.insert(op, times);
    }

    /// Make every call to `op` fail with `error`.
    pub fn fail_permanently(&self, op: &'static str, error: ApiError) {
        self.state.lock().unwrap().faults.permanent.insert(op, error);
    }

    /// Number of calls made to `op` so far.
    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().unwrap().calls.get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn repo_count(&self) -> usize {
        self.state.lock().unwrap().repos.len()
    }

    pub fn branch_head(&self, owner: &str, name: &str, branch: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.repos.get(&full_name(owner, name))?.branches.get(branch).cloned()
    }

    /// Content of `path` at the tip of `branch`.
    pub fn file_at_head(&self, owner: &str, name: &str, branch: &str, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let repo = state.repos.get(&full_name(owner, name))?;
        let head = repo.branches.get(branch)?;
        let tree = repo.trees.get(&repo.commits.get(head)?.tree)?;
        repo.blobs.get(tree.get(path)?).cloned()
    }

    /// Paths in the tree at the tip of `branch`.
    pub fn paths_at_head(&self, owner: &str, name: &str, branch: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let Some(repo) = state.repos.get(&full_name(owner, name)) else {
            return vec![];
        };
        repo.branches
            .get(branch)
            .and_then(|head| repo.commits.get(head))
            .and_then(|commit| repo.trees.get(&commit.tree))
            .map(|tree| tree.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn commit_message(&self, owner: &str, name: &str, sha: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        Some(state.repos.get(&full_name(owner, name))?.commits.get(sha)?.message.clone())
    }

    pub fn commit_time(&self, owner: &str, name: &str, sha: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().unwrap();
        Some(state.repos.get(&full_name(owner, name))?.commits.get(sha)?.committed_at)
    }

    /// Number of commits reachable from the tip of `branch`.
    pub fn history_len(&self, owner: &str, name: &str, branch: &str) -> usize {
        let state = self.state.lock().unwrap();
        let Some(repo) = state.repos.get(&full_name(owner, name)) else {
            return 0;
        };
        let mut len = 0;
        let mut next = repo.branches.get(branch).cloned();
        while let Some(sha) = next {
            len += 1;
            next = repo.commits.get(&sha).and_then(|c| c.parents.first().cloned());
        }
        len
    }

    pub fn pages_enabled(&self, owner: &str, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(&full_name(owner, name))
            .is_some_and(|r| r.pages.is_some())
    }

    /// Record a call and apply any injected fault for `op`.
    fn enter(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, State>, ApiError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.faults.permanent.get(op) {
            return Err(err.clone());
        }
        if let Some(remaining) = state.faults.transient.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::from_status(502, op, "injected transient failure"));
            }
        }
        Ok(state)
    }
}

fn full_name(owner: &str, name: &str) -> String {
    format!("{}/{}", owner.to_ascii_lowercase(), name.to_ascii_lowercase())
}

fn empty_repo(owner: &str, name: &str, private: bool) -> FakeRepo {
    FakeRepo {
        info: RepoInfo {
            name: name.to_string(),
            owner: Owner {
                login: owner.to_string(),
            },
            default_branch: "main".to_string(),
            html_url: format!("https://github.com/{owner}/{name}"),
            private,
        },
        blobs: HashMap::new(),
        trees: HashMap::new(),
        commits: HashMap::new(),
        branches: HashMap::new(),
        pages: None,
    }
}

fn insert_blob(repo: &mut FakeRepo, content: &str) -> String {
    let sha = digest("blob", &[content]);
    repo.blobs.insert(sha.clone(), content.to_string());
    sha
}

fn insert_tree(repo: &mut FakeRepo, base: Option<BTreeMap<String, String>>, files: &[(&str, &str)]) -> String {
    let mut tree = base.unwrap_or_default();
    for (path, content) in files {
        let sha = insert_blob(repo, content);
        tree.insert((*path).to_string(), sha);
    }
    store_tree(repo, tree)
}

fn store_tree(repo: &mut FakeRepo, tree: BTreeMap<String, String>) -> String {
    let flat: Vec<String> = tree.iter().map(|(p, s)| format!("{p}={s}")).collect();
    let parts: Vec<&str> = flat.iter().map(String::as_str).collect();
    let sha = digest("tree", &parts);
    repo.trees.insert(sha.clone(), tree);
    sha
}

fn insert_commit(counter: &mut u64, repo: &mut FakeRepo, message: &str, tree: String, parents: Vec<String>) -> String {
    *counter += 1;
    let n = counter.to_string();
    let mut parts = vec![tree.as_str(), message, n.as_str()];
    parts.extend(parents.iter().map(String::as_str));
    let sha = digest("commit", &parts);
    // one simulated minute per commit, so commit times are stable and ordered
    let seconds = 1_700_000_000 + 60 * i64::try_from(*counter).unwrap_or(0);
    let committed_at = DateTime::from_timestamp(seconds, 0).unwrap_or_default();
    repo.commits.insert(
        sha.clone(),
        FakeCommit {
            tree,
            parents,
            message: message.to_string(),
            committed_at,
        },
    );
    sha
}

fn missing(resource: String) -> ApiError {
    ApiError::NotFound { resource }
}

#[async_trait]
impl GitHubApi for MemoryGitHub {
    async fn authenticated_user(&self) -> Result<Owner, ApiError> {
        tokio::task::yield_now().await;
        self.enter("authenticated_user")?;
        Ok(Owner {
            login: self.login.clone(),
        })
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo, ApiError> {
        tokio::task::yield_now().await;
        let state = self.enter("get_repo")?;
        state
            .repos
            .get(&full_name(owner, repo))
            .map(|r| r.info.clone())
            .ok_or_else(|| missing(format!("repository {owner}/{repo}")))
    }

    async fn create_repo(&self, new: &NewRepo) -> Result<RepoInfo, ApiError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("create_repo")?;
        let owner = if new.organization { new.owner.clone() } else { self.login.clone() };
        let key = full_name(&owner, &new.name);
        if state.repos.contains_key(&key) {
            return Err(ApiError::Conflict {
                resource: format!("repository {owner}/{}", new.name),
                message: "name already exists on this account".into(),
            });
        }
        let mut repo = empty_repo(&owner, &new.name, new.private);
        let readme = format!("# {}\n", new.name);
        let tree = insert_tree(&mut repo, None, &[("README.md", &readme)]);
        let state = &mut *state;
        let sha = insert_commit(&mut state.commit_counter, &mut repo, "Initial commit", tree, vec![]);
        repo.branches.insert("main".into(), sha);
        let info = repo.info.clone();
        state.repos.insert(key, repo);
        Ok(info)
    }

    async fn get_branch_head(&self, owner: &str, repo: &str, branch: &str) -> Result<BranchHead, ApiError> {
        tokio::task::yield_now().await;
        let state = self.enter("get_branch_head")?;
        let r = state
            .repos
            .get(&full_name(owner, repo))
            .ok_or_else(|| missing(format!("repository {owner}/{repo}")))?;
        let commit_sha = r
            .branches
            .get(branch)
            .ok_or_else(|| missing(format!("branch {branch}")))?;
        let commit = r
            .commits
            .get(commit_sha)
            .ok_or_else(|| missing(format!("commit {commit_sha}")))?;
        Ok(BranchHead {
            commit_sha: commit_sha.clone(),
            tree_sha: commit.tree.clone(),
            committed_at: commit.committed_at,
        })
    }

    async fn create_blob(&self, owner: &str, repo: &str, content: &str) -> Result<String, ApiError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("create_blob")?;
        let n = state.calls.get("create_blob").copied().unwrap_or(0);
        if let Some((nth, err)) = &state.faults.fail_blob_at {
            if *nth == n {
                return Err(err.clone());
            }
        }
        let r = state
            .repos
            .get_mut(&full_name(owner, repo))
            .ok_or_else(|| missing(format!("repository {owner}/{repo}")))?;
        Ok(insert_blob(r, content))
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: Option<&str>,
        entries: &[TreeEntry],
    ) -> Result<String, ApiError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("create_tree")?;
        let r = state
            .repos
            .get_mut(&full_name(owner, repo))
            .ok_or_else(|| missing(format!("repository {owner}/{repo}")))?;
        let mut tree = match base_tree {
            Some(base) => r
                .trees
                .get(base)
                .cloned()
                .ok_or_else(|| missing(format!("tree {base}")))?,
            None => BTreeMap::new(),
        };
        for entry in entries {
            if !r.blobs.contains_key(&entry.sha) {
                return Err(ApiError::Conflict {
                    resource: "tree".into(),
                    message: format!("unknown blob {}", entry.sha),
                });
            }
            tree.insert(entry.path.clone(), entry.sha.clone());
        }
        Ok(store_tree(r, tree))
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<String, ApiError> {
        tokio::task::yield_now().await;
        let mut guard = self.enter("create_commit")?;
        let state = &mut *guard;
        let r = state
            .repos
            .get_mut(&full_name(owner, repo))
            .ok_or_else(|| missing(format!("repository {owner}/{repo}")))?;
        if !r.trees.contains_key(tree) {
            return Err(missing(format!("tree {tree}")));
        }
        Ok(insert_commit(
            &mut state.commit_counter,
            r,
            message,
            tree.to_string(),
            parents.to_vec(),
        ))
    }

    async fn update_ref(&self, owner: &str, repo: &str, branch: &str, sha: &str, force: bool) -> Result<(), ApiError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("update_ref")?;
        let r = state
            .repos
            .get_mut(&full_name(owner, repo))
            .ok_or_else(|| missing(format!("repository {owner}/{repo}")))?;
        if !r.commits.contains_key(sha) {
            return Err(ApiError::Conflict {
                resource: format!("ref heads/{branch}"),
                message: "Object does not exist".into(),
            });
        }
        let current = r
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| missing(format!("ref heads/{branch}")))?;
        if !force && !r.is_ancestor(&current, sha) {
            return Err(ApiError::Conflict {
                resource: format!("ref heads/{branch}"),
                message: "Update is not a fast forward".into(),
            });
        }
        r.branches.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn enable_pages(&self, owner: &str, repo: &str, _branch: &str, _path: &str) -> Result<PagesSite, ApiError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("enable_pages")?;
        let r = state
            .repos
            .get_mut(&full_name(owner, repo))
            .ok_or_else(|| missing(format!("repository {owner}/{repo}")))?;
        if r.pages.is_some() {
            return Err(ApiError::Conflict {
                resource: "pages".into(),
                message: "GitHub Pages is already enabled.".into(),
            });
        }
        let site = PagesSite {
            html_url: Some(crate::github::pages_url(&r.info.owner.login, &r.info.name)),
            status: Some("building".into()),
        };
        r.pages = Some(site.clone());
        Ok(site)
    }

    async fn get_pages(&self, owner: &str, repo: &str) -> Result<PagesSite, ApiError> {
        tokio::task::yield_now().await;
        let state = self.enter("get_pages")?;
        state
            .repos
            .get(&full_name(owner, repo))
            .and_then(|r| r.pages.clone())
            .ok_or_else(|| missing("pages".into()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Generator that returns a fixed answer and counts calls.
#[derive(Debug)]
pub struct ScriptedGenerator {
    answer: Result<GeneratedFileSet, GenerationError>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn files(files: &[(&str, &str)]) -> Self {
        let set = GeneratedFileSet::from_files(files.iter().copied())
            .unwrap_or_default();
        Self {
            answer: Ok(set),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: GenerationError) -> Self {
        Self {
            answer: Err(error),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Attachment names seen by each call.
    pub fn seen_attachments(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _request: &GenerationRequest,
        attachments: &[AttachmentRef],
    ) -> Result<GeneratedFileSet, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push(attachments.iter().map(|a| a.name.clone()).collect());
        match &self.answer {
            Ok(files) if files.is_empty() => Err(GenerationError::Empty),
            other => other.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedProbe
// ---------------------------------------------------------------------------

/// Page probe that replays queued results, then repeats a fallback.
#[derive(Debug)]
pub struct ScriptedProbe {
    queue: Mutex<VecDeque<ProbeResult>>,
    fallback: ProbeResult,
    probes: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn new(script: Vec<ProbeResult>, fallback: ProbeResult) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback,
            probes: Mutex::new(0),
        }
    }

    /// Live from the first probe.
    pub fn live() -> Self {
        Self::new(vec![], ProbeResult::Responded(200))
    }

    /// Never reachable.
    pub fn unreachable() -> Self {
        Self::new(vec![], ProbeResult::Unreachable("connection refused".into()))
    }

    pub fn probes(&self) -> usize {
        *self.probes.lock().unwrap()
    }
}

#[async_trait]
impl PageProbe for ScriptedProbe {
    async fn probe(&self, _url: &str) -> ProbeResult {
        *self.probes.lock().unwrap() += 1;
        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
