//! Panemux orchestration engine
//!
//! Runs up to a fixed pool of isolated working copies ("panes") of one
//! repository, each independently modified by an external change agent, and
//! merges them back to a shared trunk one at a time:
//! - Per-pane state machine with guarded transitions
//! - Ahead/stale divergence tracking against the remote trunk tip
//! - Agent run supervision with ordered, replayable output streams
//! - A strictly FIFO merge queue drained by a single worker
//! - Agent-delegated conflict resolution with safe abort
//!
//! The VCS layer and the change agent are external collaborators behind the
//! `WorkingCopy` and `ChangeAgent` traits from the sibling crates.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod divergence;
pub mod error;
pub mod merge_queue;
pub mod orchestrator;
pub mod pane;
pub mod resolve;
pub mod supervisor;
pub mod types;

pub use divergence::Divergence;
pub use error::OrchestratorError;
pub use merge_queue::{MergeQueue, MergeWorker, MergeWorkerHandle};
pub use orchestrator::Orchestrator;
pub use pane::{Pane, PaneArena};
pub use resolve::{AgentConflictResolver, ConflictContext, ConflictResolver, ResolutionOutcome};
pub use supervisor::{AgentRunSupervisor, OutputStream, RunEvent, CONFLICT_COMMIT_MESSAGE};
pub use types::{
    branch_name, MergeQueueEntry, MergeQueueSnapshot, OrchestratorConfig, PaneId, PaneSnapshot,
    PaneStatus, QueueEntryStatus, DEFAULT_DIFF_LIMIT_BYTES, DEFAULT_POOL_SIZE,
};
