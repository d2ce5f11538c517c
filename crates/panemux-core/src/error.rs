//! Error taxonomy for the orchestration engine
//!
//! Guard violations are rejected synchronously with no state change; VCS
//! failures leave the pane in its pre-operation state. A conflicted merge is
//! not an error anywhere in this taxonomy - it is an expected outcome that
//! drives the resolution path.

use panemux_agent::AgentError;
use panemux_vcs::VcsError;

use crate::types::PaneId;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A VCS-layer operation failed unexpectedly.
    #[error("vcs operation failed: {0}")]
    Vcs(#[from] VcsError),

    /// The change-agent process could not start.
    #[error("agent launch failed: {0}")]
    AgentLaunch(#[from] AgentError),

    /// An agent run is already active for this pane.
    #[error("agent already running for pane {0}")]
    AgentBusy(PaneId),

    /// Pane id outside the configured pool.
    #[error("invalid pane id {id} (pool size {pool_size})")]
    InvalidPane {
        id: u8,
        pool_size: u8,
    },

    /// The pane is queued for or undergoing a merge.
    #[error("pane {0} has a merge pending")]
    MergePending(PaneId),

    /// The operation requires a pane with an active branch.
    #[error("pane {0} is not on an active branch")]
    NotActive(PaneId),

    /// Pane creation requested for a pane that already has a branch.
    #[error("pane {0} is already active")]
    AlreadyActive(PaneId),
}

impl OrchestratorError {
    /// Short machine-readable tag for the presentation layer.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Vcs(err) => err.kind(),
            Self::AgentLaunch(_) => "agent_launch",
            Self::AgentBusy(_) => "agent_busy",
            Self::InvalidPane { .. } => "invalid_pane",
            Self::MergePending(_) => "merge_pending",
            Self::NotActive(_) => "not_active",
            Self::AlreadyActive(_) => "already_active",
        }
    }

    /// True for synchronous guard rejections that changed no state.
    #[inline]
    #[must_use]
    pub fn is_guard_rejection(&self) -> bool {
        matches!(
            self,
            Self::AgentBusy(_)
                | Self::MergePending(_)
                | Self::NotActive(_)
                | Self::AlreadyActive(_)
        )
    }
}
