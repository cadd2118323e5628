//! File-level changes between two revisions of a target repository.

use std::fmt;
use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::error::{Result, SyncError};

/// Immutable identifier of a point in a repository's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(8)
            .map_or(self.0.as_str(), |(end, _)| &self.0[..end])
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Deleted,
    Modified,
    Added,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Added => write!(f, "added"),
        }
    }
}

/// A single file change.
///
/// `previous` holds the file content as of the base revision for modified and
/// deleted files, so a method can recover the identity of what to tear down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    pub previous: Option<Vec<u8>>,
}

impl Change {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Added,
            previous: None,
        }
    }

    pub fn modified(path: impl Into<String>, previous: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Modified,
            previous: Some(previous),
        }
    }

    pub fn deleted(path: impl Into<String>, previous: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Deleted,
            previous: Some(previous),
        }
    }

    /// Deletions carry no new content to load.
    pub fn is_tombstone(&self) -> bool {
        self.kind == ChangeKind::Deleted
    }
}

/// Ordered changes between `from` (None = empty repository) and `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub from: Option<Revision>,
    pub to: Revision,
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Build a change set, ordering changes by path. A path that is both
    /// deleted and added (rename onto an existing name) keeps the deletion first.
    pub fn new(from: Option<Revision>, to: Revision, mut changes: Vec<Change>) -> Self {
        changes.sort_by(|a, b| a.path.cmp(&b.path).then(a.kind.cmp(&b.kind)));
        Self { from, to, changes }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

/// Restricts a diff to files under a base path, matching a glob and one of
/// the recognized extension tags.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    base: String,
    glob: Pattern,
    tags: Vec<String>,
}

impl ChangeFilter {
    pub fn new(base: &str, glob: &str, tags: &[&str]) -> Result<Self> {
        let glob = Pattern::new(glob)
            .map_err(|e| SyncError::Config(format!("invalid glob '{glob}': {e}")))?;
        Ok(Self {
            base: base.trim_matches('/').to_string(),
            glob,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        })
    }

    /// Base path, relative to the repository root, without slashes at either end.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn matches(&self, path: &str) -> bool {
        let relative = if self.base.is_empty() {
            path
        } else {
            match path
                .strip_prefix(self.base.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };

        let has_tag = Path::new(relative)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.tags.iter().any(|t| t.trim_start_matches('.') == ext))
            .unwrap_or(false);

        let options = MatchOptions {
            require_literal_separator: false,
            ..MatchOptions::default()
        };
        has_tag && self.glob.matches_with(relative, options)
    }
}
