//! Pane arena and per-pane state machine
//!
//! The pool is an explicit fixed-size arena of slots; a slot is free when its
//! pane sits on trunk. Transitions are guarded methods on `Pane`, applied
//! under the slot's data lock so no two transitions for the same pane can
//! interleave. Longer command sequences (create, discard, agent start)
//! additionally serialize on a per-pane operation lock.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::OrchestratorError;
use crate::types::{PaneId, PaneStatus};

/// One isolated working copy plus its orchestration state.
#[derive(Debug, Clone)]
pub struct Pane {
    /// Slot identity within the pool.
    pub id: PaneId,
    /// Authoritative status (see the state machine in `PaneStatus`).
    pub status: PaneStatus,
    /// Pane branch; `Some` iff the pane is active in any sense.
    pub branch: Option<String>,
    /// Cosmetic caller-supplied title.
    pub title: Option<String>,
}

impl Pane {
    fn new(id: PaneId) -> Self {
        Self {
            id,
            status: PaneStatus::OnTrunk,
            branch: None,
            title: None,
        }
    }

    /// True while a change-agent invocation owns this pane's tree.
    #[inline]
    #[must_use]
    pub fn agent_running(&self) -> bool {
        matches!(self.status, PaneStatus::AgentRunning)
    }

    /// OnTrunk -> Active: a branch has been cut for this pane.
    pub fn activate(&mut self, branch: String) -> Result<(), OrchestratorError> {
        if self.status != PaneStatus::OnTrunk {
            return Err(OrchestratorError::AlreadyActive(self.id));
        }
        self.status = PaneStatus::Active;
        self.branch = Some(branch);
        Ok(())
    }

    /// Active -> AgentRunning: an interactive agent run is starting.
    pub fn begin_run(&mut self) -> Result<(), OrchestratorError> {
        match self.status {
            PaneStatus::Active => {
                self.status = PaneStatus::AgentRunning;
                Ok(())
            }
            PaneStatus::AgentRunning => Err(OrchestratorError::AgentBusy(self.id)),
            PaneStatus::OnTrunk => Err(OrchestratorError::NotActive(self.id)),
            _ => Err(OrchestratorError::MergePending(self.id)),
        }
    }

    /// AgentRunning -> Active: the run completed, success or failure.
    ///
    /// Infallible so a pane can never stick in `AgentRunning`.
    pub fn finish_run(&mut self) {
        if self.status != PaneStatus::AgentRunning {
            warn!(pane = %self.id, status = ?self.status, "finish_run outside AgentRunning");
        }
        self.status = PaneStatus::Active;
    }

    /// Active -> MergeQueued. Returns false (and changes nothing) when the
    /// pane is already queued; re-requesting a merge is a no-op.
    pub fn request_merge(&mut self) -> Result<bool, OrchestratorError> {
        match self.status {
            PaneStatus::Active => {
                self.status = PaneStatus::MergeQueued;
                Ok(true)
            }
            PaneStatus::MergeQueued => Ok(false),
            PaneStatus::AgentRunning => Err(OrchestratorError::AgentBusy(self.id)),
            PaneStatus::OnTrunk => Err(OrchestratorError::NotActive(self.id)),
            _ => Err(OrchestratorError::MergePending(self.id)),
        }
    }

    /// MergeQueued -> Merging: the merge worker picked this pane up.
    pub fn begin_merge(&mut self) {
        debug_assert_eq!(self.status, PaneStatus::MergeQueued);
        self.status = PaneStatus::Merging;
    }

    /// Merging -> ConflictResolving.
    pub fn begin_conflict_resolution(&mut self) {
        debug_assert_eq!(self.status, PaneStatus::Merging);
        self.status = PaneStatus::ConflictResolving;
    }

    /// ConflictResolving -> Aborting.
    pub fn begin_abort(&mut self) {
        debug_assert_eq!(self.status, PaneStatus::ConflictResolving);
        self.status = PaneStatus::Aborting;
    }

    /// Aborting -> Active: the merge attempt was undone; pane work survives
    /// on its original branch.
    pub fn abort_complete(&mut self) {
        self.status = PaneStatus::Active;
    }

    /// Merging -> Active: the merge failed for a non-conflict reason; the
    /// pane is left on its branch for inspection.
    pub fn merge_failed(&mut self) {
        self.status = PaneStatus::Active;
    }

    /// Any merge-owned state -> OnTrunk: merge pushed, branch deleted.
    pub fn finalize(&mut self) {
        self.status = PaneStatus::OnTrunk;
        self.branch = None;
    }

    /// Reject discard while an agent or the merge worker owns the tree.
    pub fn discard_guard(&self) -> Result<(), OrchestratorError> {
        if self.agent_running() {
            return Err(OrchestratorError::AgentBusy(self.id));
        }
        if self.status.merge_pending() {
            return Err(OrchestratorError::MergePending(self.id));
        }
        Ok(())
    }

    /// Return the slot to the pool.
    pub fn reset(&mut self) {
        self.status = PaneStatus::OnTrunk;
        self.branch = None;
        self.title = None;
    }
}

struct Slot {
    pane: Mutex<Pane>,
    /// Serializes multi-step command sequences for this pane.
    op_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Fixed-size arena of pane slots, ids 1..=pool_size.
pub struct PaneArena {
    slots: Vec<Slot>,
}

impl PaneArena {
    /// Create an arena with every slot free.
    #[must_use]
    pub fn new(pool_size: u8) -> Self {
        let slots = (1..=pool_size)
            .map(|id| Slot {
                pane: Mutex::new(Pane::new(PaneId(id))),
                op_lock: Arc::new(tokio::sync::Mutex::new(())),
            })
            .collect();
        Self { slots }
    }

    /// Number of slots in the pool.
    #[inline]
    #[must_use]
    pub fn pool_size(&self) -> u8 {
        self.slots.len() as u8
    }

    fn slot(&self, id: PaneId) -> Result<&Slot, OrchestratorError> {
        if id.0 == 0 || id.0 as usize > self.slots.len() {
            return Err(OrchestratorError::InvalidPane {
                id: id.0,
                pool_size: self.pool_size(),
            });
        }
        Ok(&self.slots[(id.0 - 1) as usize])
    }

    /// Run a closure against the pane under its data lock.
    pub fn with_pane<T>(
        &self,
        id: PaneId,
        f: impl FnOnce(&mut Pane) -> T,
    ) -> Result<T, OrchestratorError> {
        let slot = self.slot(id)?;
        let mut pane = slot.pane.lock();
        Ok(f(&mut pane))
    }

    /// Operation lock for multi-step sequences against this pane.
    pub fn op_lock(&self, id: PaneId) -> Result<Arc<tokio::sync::Mutex<()>>, OrchestratorError> {
        Ok(Arc::clone(&self.slot(id)?.op_lock))
    }

    /// Snapshot of every pane, ordered by id.
    #[must_use]
    pub fn panes(&self) -> Vec<Pane> {
        self.slots.iter().map(|s| s.pane.lock().clone()).collect()
    }

    /// Ids of slots currently free (on trunk).
    #[must_use]
    pub fn free_ids(&self) -> Vec<PaneId> {
        self.slots
            .iter()
            .filter_map(|s| {
                let pane = s.pane.lock();
                (pane.status == PaneStatus::OnTrunk).then_some(pane.id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_pane() -> Pane {
        let mut pane = Pane::new(PaneId(1));
        pane.activate("tmp-1-abc123".to_string()).unwrap();
        pane
    }

    #[test]
    fn new_pane_is_on_trunk_without_branch() {
        let pane = Pane::new(PaneId(1));
        assert_eq!(pane.status, PaneStatus::OnTrunk);
        assert_eq!(pane.branch, None);
    }

    #[test]
    fn activate_requires_on_trunk() {
        let mut pane = active_pane();
        let err = pane.activate("tmp-1-dup".to_string()).unwrap_err();
        assert_eq!(err.kind(), "already_active");
        assert_eq!(pane.branch.as_deref(), Some("tmp-1-abc123"));
    }

    #[test]
    fn begin_run_guards() {
        let mut pane = Pane::new(PaneId(1));
        assert_eq!(pane.begin_run().unwrap_err().kind(), "not_active");

        let mut pane = active_pane();
        pane.begin_run().unwrap();
        assert_eq!(pane.status, PaneStatus::AgentRunning);
        assert_eq!(pane.begin_run().unwrap_err().kind(), "agent_busy");
    }

    #[test]
    fn finish_run_always_returns_to_active() {
        let mut pane = active_pane();
        pane.begin_run().unwrap();
        pane.finish_run();
        assert_eq!(pane.status, PaneStatus::Active);
    }

    #[test]
    fn request_merge_is_idempotent() {
        let mut pane = active_pane();
        assert!(pane.request_merge().unwrap());
        assert_eq!(pane.status, PaneStatus::MergeQueued);
        assert!(!pane.request_merge().unwrap());
        assert_eq!(pane.status, PaneStatus::MergeQueued);
    }

    #[test]
    fn request_merge_rejected_while_agent_runs() {
        let mut pane = active_pane();
        pane.begin_run().unwrap();
        assert_eq!(pane.request_merge().unwrap_err().kind(), "agent_busy");
    }

    #[test]
    fn conflict_path_transitions() {
        let mut pane = active_pane();
        pane.request_merge().unwrap();
        pane.begin_merge();
        pane.begin_conflict_resolution();
        assert_eq!(pane.status, PaneStatus::ConflictResolving);
        pane.begin_abort();
        pane.abort_complete();
        assert_eq!(pane.status, PaneStatus::Active);
        assert!(pane.branch.is_some());
    }

    #[test]
    fn finalize_clears_branch() {
        let mut pane = active_pane();
        pane.request_merge().unwrap();
        pane.begin_merge();
        pane.finalize();
        assert_eq!(pane.status, PaneStatus::OnTrunk);
        assert_eq!(pane.branch, None);
    }

    #[test]
    fn discard_guard_rejects_running_and_merging() {
        let mut pane = active_pane();
        pane.begin_run().unwrap();
        assert_eq!(pane.discard_guard().unwrap_err().kind(), "agent_busy");
        pane.finish_run();
        pane.request_merge().unwrap();
        assert_eq!(pane.discard_guard().unwrap_err().kind(), "merge_pending");
    }

    #[test]
    fn arena_validates_pane_ids() {
        let arena = PaneArena::new(6);
        assert!(arena.with_pane(PaneId(0), |_| ()).is_err());
        assert!(arena.with_pane(PaneId(7), |_| ()).is_err());
        assert!(arena.with_pane(PaneId(6), |_| ()).is_ok());
    }

    #[test]
    fn arena_tracks_free_slots() {
        let arena = PaneArena::new(3);
        assert_eq!(arena.free_ids().len(), 3);
        arena
            .with_pane(PaneId(2), |p| p.activate("tmp-2-zzz999".to_string()))
            .unwrap()
            .unwrap();
        let free = arena.free_ids();
        assert_eq!(free, vec![PaneId(1), PaneId(3)]);
    }
}
