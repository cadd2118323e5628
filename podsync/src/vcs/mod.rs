//! Version control capability.
//!
//! Everything the engine needs from a repository: fetching it, resolving the
//! tracked branch, diffing two revisions and reading file content at a
//! revision. [`GitProvider`] implements it with libgit2.

mod git;

pub use git::GitProvider;

use async_trait::async_trait;

use crate::changes::{ChangeFilter, ChangeSet, Revision};
use crate::config::TargetConfig;
use crate::error::Result;

#[async_trait]
pub trait VersionControlProvider: Send + Sync {
    /// Make the target's repository available locally and up to date with
    /// its remote (clone on first use, fetch afterwards).
    async fn prepare(&self, target: &TargetConfig) -> Result<()>;

    /// Revision at the head of the target's branch.
    async fn resolve_head(&self, target: &TargetConfig) -> Result<Revision>;

    /// Changes between `from` and `to`, restricted by `filter`.
    /// `from == None` diffs against the empty repository.
    async fn diff(
        &self,
        target: &TargetConfig,
        from: Option<&Revision>,
        to: &Revision,
        filter: &ChangeFilter,
    ) -> Result<ChangeSet>;

    /// Content of `path` as of `revision`.
    async fn read_file(&self, target: &TargetConfig, revision: &Revision, path: &str)
        -> Result<Vec<u8>>;
}
