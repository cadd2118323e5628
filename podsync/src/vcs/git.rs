//! Git repositories through libgit2.
//!
//! Repositories are kept as bare clones under `<repos_dir>/<target name>`;
//! content is always read from commit trees, never from a working copy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::{
    Cred, Delta, DiffOptions, FetchOptions, Oid, RemoteCallbacks, Repository, Tree,
};
use tracing::{debug, info};

use super::VersionControlProvider;
use crate::changes::{Change, ChangeFilter, ChangeSet, Revision};
use crate::config::TargetConfig;
use crate::error::{Result, SyncError};

const REMOTE: &str = "origin";
const TOKEN_USER: &str = "podsync";

/// libgit2-backed provider.
#[derive(Debug, Clone)]
pub struct GitProvider {
    repos_dir: PathBuf,
    token: Option<String>,
}

impl GitProvider {
    /// `token` is a personal access token used for HTTPS remotes.
    pub fn new(repos_dir: impl Into<PathBuf>, token: Option<String>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            token,
        }
    }

    /// Local clone directory of a target.
    pub fn repo_path(&self, target: &TargetConfig) -> PathBuf {
        self.repos_dir.join(&target.name)
    }

    fn open(&self, target: &TargetConfig) -> Result<Repository> {
        let path = self.repo_path(target);
        Repository::open_bare(&path)
            .map_err(|e| SyncError::Diff(format!("failed to open {}: {}", path.display(), e.message())))
    }
}

/// Run blocking libgit2 work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Diff(format!("git task failed: {e}")))?
}

fn tracking_ref(branch: &str) -> String {
    format!("refs/remotes/{REMOTE}/{branch}")
}

fn fetch(repo: &Repository, url: &str, branch: &str, token: Option<&str>) -> Result<()> {
    let mut remote = match repo.find_remote(REMOTE) {
        Ok(remote) if remote.url() == Some(url) => remote,
        Ok(_) => {
            repo.remote_set_url(REMOTE, url)?;
            repo.find_remote(REMOTE)?
        }
        Err(_) => repo.remote(REMOTE, url)?,
    };

    let mut callbacks = RemoteCallbacks::new();
    if let Some(token) = token {
        let token = token.to_string();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext(TOKEN_USER, &token)
        });
    }
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);

    let refspec = format!("+refs/heads/{branch}:{}", tracking_ref(branch));
    remote.fetch(&[refspec.as_str()], Some(&mut options), None)?;
    Ok(())
}

fn commit_tree<'r>(repo: &'r Repository, revision: &Revision) -> Result<Tree<'r>> {
    let oid = Oid::from_str(revision.as_str())
        .map_err(|e| SyncError::Diff(format!("invalid revision {revision}: {}", e.message())))?;
    let commit = repo
        .find_commit(oid)
        .map_err(|e| SyncError::Diff(format!("unknown revision {revision}: {}", e.message())))?;
    Ok(commit.tree()?)
}

fn blob_content(repo: &Repository, id: Oid) -> Result<Vec<u8>> {
    Ok(repo.find_blob(id)?.content().to_vec())
}

fn path_string(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// Diff two commit trees into a filtered change set.
fn diff_trees(
    repo: &Repository,
    from: Option<&Revision>,
    to: &Revision,
    filter: &ChangeFilter,
) -> Result<ChangeSet> {
    let old_tree = from.map(|rev| commit_tree(repo, rev)).transpose()?;
    let new_tree = commit_tree(repo, to)?;

    let mut options = DiffOptions::new();
    options.include_typechange(true);
    if !filter.base().is_empty() {
        options.pathspec(filter.base());
    }
    let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut options))?;

    let mut changes = Vec::new();
    for delta in diff.deltas() {
        let old_path = path_string(delta.old_file().path());
        let new_path = path_string(delta.new_file().path());

        match delta.status() {
            Delta::Added | Delta::Copied => {
                if let Some(path) = new_path.filter(|p| filter.matches(p)) {
                    changes.push(Change::added(path));
                }
            }
            Delta::Modified | Delta::Typechange => {
                if let Some(path) = new_path.filter(|p| filter.matches(p)) {
                    let previous = blob_content(repo, delta.old_file().id())?;
                    changes.push(Change::modified(path, previous));
                }
            }
            Delta::Deleted => {
                if let Some(path) = old_path.filter(|p| filter.matches(p)) {
                    let previous = blob_content(repo, delta.old_file().id())?;
                    changes.push(Change::deleted(path, previous));
                }
            }
            Delta::Renamed => {
                if let Some(path) = old_path.filter(|p| filter.matches(p)) {
                    let previous = blob_content(repo, delta.old_file().id())?;
                    changes.push(Change::deleted(path, previous));
                }
                if let Some(path) = new_path.filter(|p| filter.matches(p)) {
                    changes.push(Change::added(path));
                }
            }
            status => debug!("Ignoring diff entry with status {:?}", status),
        }
    }

    Ok(ChangeSet::new(from.cloned(), to.clone(), changes))
}

#[async_trait]
impl VersionControlProvider for GitProvider {
    async fn prepare(&self, target: &TargetConfig) -> Result<()> {
        let path = self.repo_path(target);
        let url = target.url.clone();
        let branch = target.branch.clone();
        let token = self.token.clone();

        blocking(move || {
            let repo = match Repository::open_bare(&path) {
                Ok(repo) => repo,
                Err(_) => {
                    info!("Initializing repository for {} at {}", url, path.display());
                    std::fs::create_dir_all(&path).map_err(|e| {
                        SyncError::Diff(format!("failed to create {}: {e}", path.display()))
                    })?;
                    Repository::init_bare(&path)?
                }
            };
            fetch(&repo, &url, &branch, token.as_deref())
        })
        .await
    }

    async fn resolve_head(&self, target: &TargetConfig) -> Result<Revision> {
        let repo = self.open(target)?;
        let branch = target.branch.clone();
        blocking(move || {
            let oid = repo.refname_to_id(&tracking_ref(&branch)).map_err(|e| {
                SyncError::Diff(format!("failed to resolve branch {branch}: {}", e.message()))
            })?;
            Ok(Revision::new(oid.to_string()))
        })
        .await
    }

    async fn diff(
        &self,
        target: &TargetConfig,
        from: Option<&Revision>,
        to: &Revision,
        filter: &ChangeFilter,
    ) -> Result<ChangeSet> {
        let repo = self.open(target)?;
        let from = from.cloned();
        let to = to.clone();
        let filter = filter.clone();
        blocking(move || diff_trees(&repo, from.as_ref(), &to, &filter)).await
    }

    async fn read_file(
        &self,
        target: &TargetConfig,
        revision: &Revision,
        path: &str,
    ) -> Result<Vec<u8>> {
        let repo = self.open(target)?;
        let revision = revision.clone();
        let path = path.to_string();
        blocking(move || {
            let read_err = |message: String| SyncError::Read {
                path: path.clone(),
                revision: revision.to_string(),
                message,
            };
            let tree = commit_tree(&repo, &revision).map_err(|e| read_err(e.to_string()))?;
            let entry = tree
                .get_path(Path::new(&path))
                .map_err(|e| read_err(e.message().to_string()))?;
            let object = entry
                .to_object(&repo)
                .map_err(|e| read_err(e.message().to_string()))?;
            let blob = object
                .peel_to_blob()
                .map_err(|e| read_err(e.message().to_string()))?;
            Ok(blob.content().to_vec())
        })
        .await
    }
}
