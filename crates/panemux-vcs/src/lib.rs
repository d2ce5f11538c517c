//! Panemux VCS layer
//!
//! Working-copy operations behind a trait so the orchestration engine can be
//! driven against fakes:
//! - Branch creation, checkout, pull, push
//! - Commit-if-dirty with a caller-supplied message
//! - No-fast-forward merge with conflict reporting
//! - Merge abort, hard reset, branch deletion
//! - Divergence counts and conflict-residue scans

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod git;

pub use error::VcsError;
pub use git::GitCli;

use std::path::Path;

use async_trait::async_trait;

/// Result of a merge attempt.
///
/// A conflict is an expected outcome, not an error: the caller decides
/// whether to resolve or abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merge committed cleanly.
    Clean,
    /// Merge stopped on conflicts; paths are the unmerged files.
    Conflict {
        /// Unmerged file paths, repository-relative.
        files: Vec<String>,
    },
}

impl MergeOutcome {
    /// True if the merge committed cleanly.
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// Operations the orchestrator needs from a working copy.
///
/// Every method takes the working directory explicitly: each pane owns its
/// own tree and implementations keep no per-tree state.
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    /// Name of the currently checked-out branch.
    async fn current_branch(&self, workdir: &Path) -> Result<String, VcsError>;

    /// Checkout an existing ref.
    async fn checkout(&self, workdir: &Path, refname: &str) -> Result<(), VcsError>;

    /// Pull the given branch from the remote.
    async fn pull(&self, workdir: &Path, branch: &str) -> Result<(), VcsError>;

    /// Fetch remote refs without touching the tree.
    async fn fetch(&self, workdir: &Path) -> Result<(), VcsError>;

    /// Create and checkout a new branch at the current HEAD.
    async fn create_branch(&self, workdir: &Path, name: &str) -> Result<(), VcsError>;

    /// True if the tree has uncommitted changes, including untracked files.
    async fn is_dirty(&self, workdir: &Path) -> Result<bool, VcsError>;

    /// Drop all uncommitted changes and untracked files.
    async fn discard_changes(&self, workdir: &Path) -> Result<(), VcsError>;

    /// Stage everything and commit with the given message.
    ///
    /// Returns the commit id, or `None` if the tree was clean. A clean tree
    /// is not an error.
    async fn commit_all(&self, workdir: &Path, message: &str) -> Result<Option<String>, VcsError>;

    /// Merge `branch` into the current branch with `--no-ff`.
    async fn merge_no_ff(
        &self,
        workdir: &Path,
        branch: &str,
        message: &str,
    ) -> Result<MergeOutcome, VcsError>;

    /// Full textual diff between two refs.
    async fn diff(&self, workdir: &Path, from: &str, to: &str) -> Result<String, VcsError>;

    /// Abort an in-progress merge.
    async fn abort_merge(&self, workdir: &Path) -> Result<(), VcsError>;

    /// Hard-reset the tree to a ref.
    async fn hard_reset(&self, workdir: &Path, refname: &str) -> Result<(), VcsError>;

    /// Force-delete a local branch.
    async fn delete_branch(&self, workdir: &Path, name: &str) -> Result<(), VcsError>;

    /// Push a branch to the remote.
    async fn push(&self, workdir: &Path, branch: &str) -> Result<(), VcsError>;

    /// Number of commits in a `rev-list` range such as `a..b`.
    async fn commit_count(&self, workdir: &Path, range: &str) -> Result<usize, VcsError>;

    /// Paths still unmerged in the index.
    async fn unmerged_paths(&self, workdir: &Path) -> Result<Vec<String>, VcsError>;

    /// True if any tracked file still contains conflict markers.
    async fn has_conflict_markers(&self, workdir: &Path) -> Result<bool, VcsError>;
}
