//! Conflict resolution orchestrator
//!
//! Builds a remediation instruction from the conflicted file list and the
//! branch-vs-trunk diff, hands it to the change agent synchronously, and
//! verifies the tree afterwards. Exactly one resolution attempt is made per
//! conflicted merge; the decision (finalize or abort) goes back to the merge
//! worker, which owns the VCS follow-up either way.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use panemux_vcs::WorkingCopy;
use tracing::{info, warn};

use crate::supervisor::AgentRunSupervisor;
use crate::types::PaneId;

/// What the merge worker should do after a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Conflicts are gone and committed; finalize the merge.
    Resolved,
    /// The agent failed or residue remains; abort the merge attempt.
    Aborted,
}

/// Everything a resolver needs to know about one conflicted merge.
#[derive(Debug, Clone)]
pub struct ConflictContext {
    pub pane: PaneId,
    pub workdir: PathBuf,
    pub branch: String,
    pub trunk: String,
    /// Unmerged file paths reported by the merge.
    pub files: Vec<String>,
    /// Branch-vs-trunk diff, already truncated to the configured bound.
    pub diff: String,
}

/// Decides whether a conflicted merge can be finalized.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, ctx: &ConflictContext) -> ResolutionOutcome;
}

/// Resolver that delegates to the change agent via the run supervisor.
pub struct AgentConflictResolver {
    supervisor: Arc<AgentRunSupervisor>,
    vcs: Arc<dyn WorkingCopy>,
}

impl AgentConflictResolver {
    #[must_use]
    pub fn new(supervisor: Arc<AgentRunSupervisor>, vcs: Arc<dyn WorkingCopy>) -> Self {
        Self { supervisor, vcs }
    }

    /// True if the tree still carries unmerged index entries or marker text.
    /// Verification failures count as residue: an unverifiable tree must not
    /// be pushed to trunk.
    async fn has_residue(&self, ctx: &ConflictContext) -> bool {
        match self.vcs.unmerged_paths(&ctx.workdir).await {
            Ok(paths) if !paths.is_empty() => return true,
            Ok(_) => {}
            Err(err) => {
                warn!(pane = %ctx.pane, %err, "unmerged-path scan failed");
                return true;
            }
        }
        match self.vcs.has_conflict_markers(&ctx.workdir).await {
            Ok(found) => found,
            Err(err) => {
                warn!(pane = %ctx.pane, %err, "conflict-marker scan failed");
                true
            }
        }
    }
}

#[async_trait]
impl ConflictResolver for AgentConflictResolver {
    async fn resolve(&self, ctx: &ConflictContext) -> ResolutionOutcome {
        let instruction = build_instruction(&ctx.trunk, &ctx.files, &ctx.diff);

        let exit = match self
            .supervisor
            .run_synchronous(ctx.pane, ctx.workdir.clone(), &instruction)
            .await
        {
            Ok(exit) => exit,
            Err(err) => {
                warn!(pane = %ctx.pane, %err, "resolution run could not start");
                return ResolutionOutcome::Aborted;
            }
        };

        if !exit.success() {
            info!(pane = %ctx.pane, code = ?exit.code, "resolution run failed");
            return ResolutionOutcome::Aborted;
        }

        if self.has_residue(ctx).await {
            info!(pane = %ctx.pane, "conflict residue remains after resolution run");
            return ResolutionOutcome::Aborted;
        }

        info!(pane = %ctx.pane, "conflicts resolved");
        ResolutionOutcome::Resolved
    }
}

/// Bound `diff` to `limit` bytes, cutting on a char boundary and marking the
/// cut. Oversized diffs are truncated rather than failing the merge.
#[must_use]
pub fn truncate_diff(diff: String, limit: usize) -> String {
    if diff.len() <= limit {
        return diff;
    }
    let mut end = limit;
    while end > 0 && !diff.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = diff[..end].to_string();
    out.push_str("\n... [diff truncated]");
    out
}

fn build_instruction(trunk: &str, files: &[String], diff: &str) -> String {
    let mut text = format!(
        "A merge into '{trunk}' stopped on conflicts in these files:\n"
    );
    for file in files {
        text.push_str("- ");
        text.push_str(file);
        text.push('\n');
    }
    text.push_str(
        "\nResolve every conflict:\n\
         1. Inspect each conflicted file and edit it so no conflict markers \
         (<<<<<<<, =======, >>>>>>>) remain.\n\
         2. Preserve the intent of both sides wherever possible.\n\
         3. Stage the resolved files.\n\
         4. Do not amend or reword any commit, and do not push.\n\
         \nDiff between the two sides for context:\n\n",
    );
    text.push_str(diff);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_lists_files_and_embeds_diff() {
        let files = vec!["src/app.rs".to_string(), "README.md".to_string()];
        let text = build_instruction("main", &files, "diff body here");
        assert!(text.contains("- src/app.rs\n"));
        assert!(text.contains("- README.md\n"));
        assert!(text.contains("'main'"));
        assert!(text.ends_with("diff body here"));
        assert!(text.contains("do not push"));
    }

    #[test]
    fn short_diff_passes_through_untouched() {
        let diff = "small".to_string();
        assert_eq!(truncate_diff(diff.clone(), 1024), diff);
    }

    #[test]
    fn oversized_diff_is_cut_and_marked() {
        let diff = "x".repeat(100);
        let out = truncate_diff(diff, 10);
        assert!(out.starts_with("xxxxxxxxxx"));
        assert!(out.ends_with("... [diff truncated]"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let diff = "é".repeat(10); // 2 bytes each
        let out = truncate_diff(diff, 5);
        assert!(out.starts_with("éé"));
        assert!(out.ends_with("... [diff truncated]"));
    }
}
