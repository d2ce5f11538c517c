//! Divergence tracker
//!
//! Answers two independent questions per pane branch, recomputed on every
//! orchestration-state query: does the branch carry commits the trunk's
//! remote tip lacks ("ahead"), and does the remote tip carry commits the
//! branch lacks ("stale"). Both are advisory display signals; they never
//! gate a merge. Query failures degrade to `false` rather than failing the
//! snapshot.

use std::path::Path;

use panemux_vcs::WorkingCopy;
use tracing::warn;

/// Ahead/stale flags for one pane branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Divergence {
    /// Branch has at least one commit not reachable from the remote trunk tip.
    pub is_ahead: bool,
    /// Remote trunk tip has at least one commit not reachable from the branch.
    pub is_stale: bool,
}

/// Compute divergence of `branch` against `remote_trunk` (e.g. `origin/main`).
///
/// Fetches before the stale check so the remote tip is current.
pub async fn compute(
    vcs: &dyn WorkingCopy,
    workdir: &Path,
    branch: &str,
    remote_trunk: &str,
) -> Divergence {
    let is_ahead = match vcs
        .commit_count(workdir, &format!("{remote_trunk}..{branch}"))
        .await
    {
        Ok(count) => count > 0,
        Err(err) => {
            warn!(%branch, %err, "ahead check failed");
            false
        }
    };

    let is_stale = match vcs.fetch(workdir).await {
        Ok(()) => match vcs
            .commit_count(workdir, &format!("{branch}..{remote_trunk}"))
            .await
        {
            Ok(count) => count > 0,
            Err(err) => {
                warn!(%branch, %err, "stale check failed");
                false
            }
        },
        Err(err) => {
            warn!(%branch, %err, "fetch before stale check failed");
            false
        }
    };

    Divergence { is_ahead, is_stale }
}
