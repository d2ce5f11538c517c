//! Git CLI implementation of the working-copy trait
//!
//! Shells out to `git` in the pane's working directory. Conflicts are
//! detected after a failed merge by listing unmerged index entries, so a
//! merge that fails for any other reason still surfaces as an error.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::VcsError;
use crate::{MergeOutcome, WorkingCopy};

/// Pattern marking an unresolved conflict hunk start.
const CONFLICT_MARKER: &str = "^<<<<<<< ";

/// Working copy driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    remote: String,
}

impl GitCli {
    /// Create a git working copy handle pushing/pulling `remote`.
    #[inline]
    #[must_use]
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }

    /// Remote name used for pull/fetch/push.
    #[inline]
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    async fn run(&self, workdir: &Path, args: &[&str]) -> Result<Output, VcsError> {
        if !workdir.exists() {
            return Err(VcsError::MissingWorkTree(workdir.to_path_buf()));
        }
        debug!(?workdir, command = %args.join(" "), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(workdir)
            .output()
            .await?;
        Ok(output)
    }

    async fn run_checked(&self, workdir: &Path, args: &[&str]) -> Result<Output, VcsError> {
        let output = self.run(workdir, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(command = %args.join(" "), %stderr, "git command failed");
            return Err(VcsError::CommandFailed {
                command: args.join(" "),
                stderr,
            });
        }
        Ok(output)
    }

    async fn run_capture(&self, workdir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = self.run_checked(workdir, args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("origin")
    }
}

#[async_trait]
impl WorkingCopy for GitCli {
    async fn current_branch(&self, workdir: &Path) -> Result<String, VcsError> {
        let out = self
            .run_capture(workdir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            return Err(VcsError::DetachedHead(workdir.to_path_buf()));
        }
        Ok(name)
    }

    async fn checkout(&self, workdir: &Path, refname: &str) -> Result<(), VcsError> {
        self.run_checked(workdir, &["checkout", refname]).await?;
        Ok(())
    }

    async fn pull(&self, workdir: &Path, branch: &str) -> Result<(), VcsError> {
        self.run_checked(workdir, &["pull", &self.remote, branch])
            .await?;
        Ok(())
    }

    async fn fetch(&self, workdir: &Path) -> Result<(), VcsError> {
        self.run_checked(workdir, &["fetch", &self.remote]).await?;
        Ok(())
    }

    async fn create_branch(&self, workdir: &Path, name: &str) -> Result<(), VcsError> {
        self.run_checked(workdir, &["checkout", "-b", name]).await?;
        Ok(())
    }

    async fn is_dirty(&self, workdir: &Path) -> Result<bool, VcsError> {
        let out = self
            .run_capture(workdir, &["status", "--porcelain=v1", "-uall"])
            .await?;
        Ok(!out.trim().is_empty())
    }

    async fn discard_changes(&self, workdir: &Path) -> Result<(), VcsError> {
        self.run_checked(workdir, &["reset", "--hard"]).await?;
        self.run_checked(workdir, &["clean", "-fd"]).await?;
        Ok(())
    }

    async fn commit_all(&self, workdir: &Path, message: &str) -> Result<Option<String>, VcsError> {
        if !self.is_dirty(workdir).await? {
            debug!(?workdir, "nothing to commit");
            return Ok(None);
        }
        self.run_checked(workdir, &["add", "-A"]).await?;
        self.run_checked(workdir, &["commit", "-m", message])
            .await?;
        let sha = self.run_capture(workdir, &["rev-parse", "HEAD"]).await?;
        Ok(Some(sha.trim().to_string()))
    }

    async fn merge_no_ff(
        &self,
        workdir: &Path,
        branch: &str,
        message: &str,
    ) -> Result<MergeOutcome, VcsError> {
        let args = ["merge", "--no-ff", "-m", message, branch];
        let output = self.run(workdir, &args).await?;
        if output.status.success() {
            return Ok(MergeOutcome::Clean);
        }
        // Distinguish a conflicted merge from any other failure by looking
        // at the index.
        let files = self.unmerged_paths(workdir).await?;
        if files.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(VcsError::CommandFailed {
                command: args.join(" "),
                stderr,
            });
        }
        debug!(?workdir, conflicted = files.len(), "merge conflicted");
        Ok(MergeOutcome::Conflict { files })
    }

    async fn diff(&self, workdir: &Path, from: &str, to: &str) -> Result<String, VcsError> {
        self.run_capture(workdir, &["diff", from, to]).await
    }

    async fn abort_merge(&self, workdir: &Path) -> Result<(), VcsError> {
        self.run_checked(workdir, &["merge", "--abort"]).await?;
        Ok(())
    }

    async fn hard_reset(&self, workdir: &Path, refname: &str) -> Result<(), VcsError> {
        self.run_checked(workdir, &["reset", "--hard", refname])
            .await?;
        Ok(())
    }

    async fn delete_branch(&self, workdir: &Path, name: &str) -> Result<(), VcsError> {
        self.run_checked(workdir, &["branch", "-D", name]).await?;
        Ok(())
    }

    async fn push(&self, workdir: &Path, branch: &str) -> Result<(), VcsError> {
        self.run_checked(workdir, &["push", &self.remote, branch])
            .await?;
        Ok(())
    }

    async fn commit_count(&self, workdir: &Path, range: &str) -> Result<usize, VcsError> {
        let out = self
            .run_capture(workdir, &["rev-list", "--count", range])
            .await?;
        parse_count(&out, range)
    }

    async fn unmerged_paths(&self, workdir: &Path) -> Result<Vec<String>, VcsError> {
        let out = self
            .run_capture(workdir, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn has_conflict_markers(&self, workdir: &Path) -> Result<bool, VcsError> {
        // `git grep` exits 1 on "no match", which is a clean result here.
        let args = ["grep", "-l", CONFLICT_MARKER];
        let output = self.run(workdir, &args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                Err(VcsError::CommandFailed {
                    command: args.join(" "),
                    stderr,
                })
            }
        }
    }
}

fn parse_count(raw: &str, range: &str) -> Result<usize, VcsError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| VcsError::CommandFailed {
            command: format!("rev-list --count {range}"),
            stderr: format!("unparseable count: '{}'", raw.trim()),
        })
}

/// Deterministic pane workdir under a base checkout directory.
#[inline]
#[must_use]
pub fn pane_workdir(base: &Path, pane: u8) -> PathBuf {
    base.join(pane.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_count_accepts_plain_number() {
        assert_eq!(parse_count("3\n", "a..b").unwrap(), 3);
        assert_eq!(parse_count("  0 ", "a..b").unwrap(), 0);
    }

    #[test]
    fn parse_count_rejects_garbage() {
        let err = parse_count("fatal: bad revision", "a..b").unwrap_err();
        assert_eq!(err.kind(), "vcs_command");
    }

    #[test]
    fn pane_workdir_joins_id() {
        assert_eq!(
            pane_workdir(Path::new("/repos/vv"), 3),
            PathBuf::from("/repos/vv/3")
        );
    }
}
