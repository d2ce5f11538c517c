//! Error types for the VCS layer

use std::path::PathBuf;

/// VCS layer error
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Spawning the git binary failed.
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    /// A git command exited unsuccessfully.
    #[error("git {command} failed: {stderr}")]
    CommandFailed {
        /// The git subcommand and arguments that failed.
        command: String,
        /// Trimmed stderr from git.
        stderr: String,
    },

    /// The working tree does not exist on disk.
    #[error("working tree missing: {0}")]
    MissingWorkTree(PathBuf),

    /// HEAD is not on a branch.
    #[error("detached HEAD in {0}")]
    DetachedHead(PathBuf),
}

impl VcsError {
    /// Short machine-readable tag for the presentation layer.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "vcs_spawn",
            Self::CommandFailed { .. } => "vcs_command",
            Self::MissingWorkTree(_) => "vcs_missing_tree",
            Self::DetachedHead(_) => "vcs_detached_head",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_display() {
        let err = VcsError::CommandFailed {
            command: "merge --no-ff topic".to_string(),
            stderr: "fatal: not something we can merge".to_string(),
        };
        assert!(err.to_string().contains("merge --no-ff topic"));
        assert_eq!(err.kind(), "vcs_command");
    }
}
