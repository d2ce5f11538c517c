//! Core types for the panemux orchestrator
//!
//! Defines the fundamental types:
//! - Pane identifiers and statuses
//! - Snapshots handed to the presentation layer
//! - Merge queue entries
//! - Orchestrator configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default number of pane slots.
pub const DEFAULT_POOL_SIZE: u8 = 6;

/// Default bound on the diff text embedded in a remediation instruction.
pub const DEFAULT_DIFF_LIMIT_BYTES: usize = 64 * 1024;

/// Pane identifier, 1-based within a fixed-size pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PaneId(pub u8);

impl std::fmt::Display for PaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authoritative per-pane orchestration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneStatus {
    /// Initial state: no pane branch, tree sits on trunk.
    OnTrunk,
    /// Branch exists, no agent running.
    Active,
    /// A change-agent invocation is in flight.
    AgentRunning,
    /// Waiting in the merge queue.
    MergeQueued,
    /// The merge worker is processing this pane.
    Merging,
    /// A conflicted merge is being handed to the change agent.
    ConflictResolving,
    /// A failed resolution is being rolled back.
    Aborting,
}

impl PaneStatus {
    /// True once a pane branch has been cut.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::OnTrunk)
    }

    /// True while the pane is queued or owned by the merge worker.
    #[inline]
    #[must_use]
    pub fn merge_pending(&self) -> bool {
        matches!(
            self,
            Self::MergeQueued | Self::Merging | Self::ConflictResolving | Self::Aborting
        )
    }
}

/// Point-in-time view of a pane for the presentation layer.
///
/// `is_ahead`/`is_stale` are recomputed from the VCS on every snapshot,
/// never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PaneSnapshot {
    pub pane_id: PaneId,
    pub active: bool,
    pub status: PaneStatus,
    pub branch: Option<String>,
    pub is_ahead: bool,
    pub is_stale: bool,
    pub agent_running: bool,
    pub title: Option<String>,
}

/// Status tag of a merge queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Queued,
    Merging,
    Done,
}

/// One pane waiting for (or undergoing) a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeQueueEntry {
    pub pane_id: PaneId,
    pub status: QueueEntryStatus,
}

/// Queue view for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct MergeQueueSnapshot {
    pub entries: Vec<MergeQueueEntry>,
    pub in_progress: bool,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory holding one checkout per pane, named by pane id.
    pub base_path: PathBuf,
    /// The shared integration branch.
    pub trunk_branch: String,
    /// Remote the trunk is pushed to and fetched from.
    pub remote: String,
    /// Number of pane slots.
    pub pool_size: u8,
    /// Change-agent binary.
    pub agent_program: String,
    /// Bound on diff text embedded in remediation instructions.
    pub diff_limit_bytes: usize,
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything but the base path.
    #[inline]
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            trunk_branch: "main".to_string(),
            remote: "origin".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            agent_program: "cursor-agent".to_string(),
            diff_limit_bytes: DEFAULT_DIFF_LIMIT_BYTES,
        }
    }

    /// With a different trunk branch.
    #[inline]
    #[must_use]
    pub fn with_trunk_branch(mut self, trunk: impl Into<String>) -> Self {
        self.trunk_branch = trunk.into();
        self
    }

    /// With a different pool size.
    #[inline]
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: u8) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// With a different agent binary.
    #[inline]
    #[must_use]
    pub fn with_agent_program(mut self, program: impl Into<String>) -> Self {
        self.agent_program = program.into();
        self
    }

    /// With a different diff truncation bound.
    #[inline]
    #[must_use]
    pub fn with_diff_limit(mut self, bytes: usize) -> Self {
        self.diff_limit_bytes = bytes;
        self
    }

    /// Working tree owned by the given pane.
    #[inline]
    #[must_use]
    pub fn pane_workdir(&self, pane: PaneId) -> PathBuf {
        self.base_path.join(pane.0.to_string())
    }

    /// Remote tip ref of the trunk, e.g. `origin/main`.
    #[inline]
    #[must_use]
    pub fn remote_trunk(&self) -> String {
        format!("{}/{}", self.remote, self.trunk_branch)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Generate a pane branch name: `tmp-{id}-{random6}`.
///
/// The random suffix keeps branch names unique across pane reuse.
#[must_use]
pub fn branch_name(pane: PaneId) -> String {
    use rand::distr::{Alphanumeric, SampleString};
    let suffix = Alphanumeric
        .sample_string(&mut rand::rng(), 6)
        .to_lowercase();
    format!("tmp-{}-{suffix}", pane.0)
}
