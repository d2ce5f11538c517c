//! Merge queue processor
//!
//! A FIFO queue of pane ids plus a dedicated worker task that owns the only
//! path to trunk. Serialization is structural: there is exactly one worker
//! and it processes one entry at a time, including any conflict-resolution
//! sub-step, so no "merge in progress" flag exists to get out of sync.
//!
//! A failed or aborted merge never blocks the queue; processing always
//! advances to the next entry.

use std::sync::Arc;

use panemux_vcs::{MergeOutcome, VcsError, WorkingCopy};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pane::PaneArena;
use crate::resolve::{truncate_diff, ConflictContext, ConflictResolver, ResolutionOutcome};
use crate::types::{
    MergeQueueEntry, MergeQueueSnapshot, OrchestratorConfig, PaneId, QueueEntryStatus,
};

/// FIFO list of panes waiting for (or undergoing) a merge.
///
/// Completed entries stay in the list with a `Done` tag so the presentation
/// layer can show recent history; they are pruned when the pane re-enqueues.
pub struct MergeQueue {
    entries: Mutex<Vec<MergeQueueEntry>>,
    notify: Notify,
}

impl MergeQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Add a pane to the tail. Returns false (leaving the queue unchanged)
    /// when the pane is already queued or merging.
    pub fn enqueue(&self, pane: PaneId) -> bool {
        let mut entries = self.entries.lock();
        let pending = entries
            .iter()
            .any(|e| e.pane_id == pane && e.status != QueueEntryStatus::Done);
        if pending {
            return false;
        }
        entries.retain(|e| e.pane_id != pane);
        entries.push(MergeQueueEntry {
            pane_id: pane,
            status: QueueEntryStatus::Queued,
        });
        drop(entries);
        self.notify.notify_one();
        true
    }

    /// Claim the oldest queued entry, tagging it `Merging`.
    fn take_next(&self) -> Option<PaneId> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.status == QueueEntryStatus::Queued)?;
        entry.status = QueueEntryStatus::Merging;
        Some(entry.pane_id)
    }

    fn finish(&self, pane: PaneId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.pane_id == pane) {
            entry.status = QueueEntryStatus::Done;
        }
    }

    /// Queue view for the presentation layer.
    #[must_use]
    pub fn snapshot(&self) -> MergeQueueSnapshot {
        let entries = self.entries.lock().clone();
        let in_progress = entries
            .iter()
            .any(|e| e.status == QueueEntryStatus::Merging);
        MergeQueueSnapshot {
            entries,
            in_progress,
        }
    }

    /// Number of entries not yet done.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.status != QueueEntryStatus::Done)
            .count()
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

impl Default for MergeQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the spawned merge worker.
pub struct MergeWorkerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MergeWorkerHandle {
    /// Stop the worker after any in-flight entry completes.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.task.await {
            error!(%err, "merge worker task panicked");
        }
    }
}

/// Terminal disposition of one queue entry, applied to the pane only
/// after the entry is marked done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Finalized,
    Failed,
    Aborted,
}

/// The single task with write access to trunk.
pub struct MergeWorker {
    vcs: Arc<dyn WorkingCopy>,
    arena: Arc<PaneArena>,
    queue: Arc<MergeQueue>,
    resolver: Arc<dyn ConflictResolver>,
    config: OrchestratorConfig,
}

impl MergeWorker {
    #[must_use]
    pub fn new(
        vcs: Arc<dyn WorkingCopy>,
        arena: Arc<PaneArena>,
        queue: Arc<MergeQueue>,
        resolver: Arc<dyn ConflictResolver>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            vcs,
            arena,
            queue,
            resolver,
            config,
        }
    }

    /// Spawn the worker loop. One worker per orchestrator.
    #[must_use]
    pub fn spawn(self) -> MergeWorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let task = tokio::spawn(async move {
            loop {
                while let Some(pane) = self.queue.take_next() {
                    self.process(pane).await;
                }
                tokio::select! {
                    () = self.queue.wait() => {}
                    () = stop.notified() => {
                        debug!("merge worker stopping");
                        return;
                    }
                }
            }
        });
        MergeWorkerHandle { shutdown, task }
    }

    async fn process(&self, pane: PaneId) {
        let branch = match self.arena.with_pane(pane, |p| {
            p.begin_merge();
            p.branch.clone()
        }) {
            Ok(Some(branch)) => branch,
            Ok(None) => {
                warn!(%pane, "queued pane has no branch; dropping entry");
                self.queue.finish(pane);
                let _ = self.arena.with_pane(pane, |p| p.merge_failed());
                return;
            }
            Err(err) => {
                warn!(%pane, %err, "queued pane vanished; dropping entry");
                self.queue.finish(pane);
                return;
            }
        };

        info!(%pane, %branch, "merge started");
        let outcome = self.merge_entry(pane, &branch).await;

        // The entry is marked done before the pane leaves its merge-owned
        // status, so any re-enqueue observed after the transition finds a
        // finished entry and is accepted.
        self.queue.finish(pane);
        let _ = self.arena.with_pane(pane, |p| match outcome {
            EntryOutcome::Finalized => p.finalize(),
            EntryOutcome::Failed => p.merge_failed(),
            EntryOutcome::Aborted => p.abort_complete(),
        });
    }

    /// One full merge attempt for one entry. Never fails outright: every
    /// failure mode resolves to a terminal disposition and the queue is
    /// free to advance.
    async fn merge_entry(&self, pane: PaneId, branch: &str) -> EntryOutcome {
        let workdir = self.config.pane_workdir(pane);
        let trunk = self.config.trunk_branch.as_str();

        let outcome = async {
            self.vcs.checkout(&workdir, trunk).await?;
            self.vcs.pull(&workdir, trunk).await?;
            let message = format!("Merge branch '{branch}'");
            self.vcs.merge_no_ff(&workdir, branch, &message).await
        }
        .await;

        match outcome {
            Ok(MergeOutcome::Clean) => match self.finalize(pane, branch).await {
                Ok(()) => {
                    info!(%pane, %branch, "merge finalized");
                    EntryOutcome::Finalized
                }
                Err(err) => self.entry_failed(pane, branch, &err).await,
            },
            Ok(MergeOutcome::Conflict { files }) => {
                self.resolve_conflict(pane, branch, files).await
            }
            Err(err) => self.entry_failed(pane, branch, &err).await,
        }
    }

    async fn resolve_conflict(
        &self,
        pane: PaneId,
        branch: &str,
        files: Vec<String>,
    ) -> EntryOutcome {
        info!(%pane, %branch, conflicted = files.len(), "merge conflicted");
        let _ = self
            .arena
            .with_pane(pane, |p| p.begin_conflict_resolution());

        let workdir = self.config.pane_workdir(pane);
        let trunk = self.config.trunk_branch.clone();
        let diff = match self.vcs.diff(&workdir, &trunk, branch).await {
            Ok(diff) => truncate_diff(diff, self.config.diff_limit_bytes),
            Err(err) => {
                warn!(%pane, %err, "diff capture failed; resolving without it");
                String::new()
            }
        };

        let ctx = ConflictContext {
            pane,
            workdir,
            branch: branch.to_string(),
            trunk,
            files,
            diff,
        };

        match self.resolver.resolve(&ctx).await {
            ResolutionOutcome::Resolved => {
                // The resolution commit completed the merge; finalize
                // directly rather than re-running the merge step.
                match self.finalize(pane, branch).await {
                    Ok(()) => {
                        info!(%pane, %branch, "conflicted merge finalized after resolution");
                        EntryOutcome::Finalized
                    }
                    Err(err) => self.entry_failed(pane, branch, &err).await,
                }
            }
            ResolutionOutcome::Aborted => self.abort(pane, branch).await,
        }
    }

    /// Push trunk and delete the pane branch.
    async fn finalize(&self, pane: PaneId, branch: &str) -> Result<(), VcsError> {
        let workdir = self.config.pane_workdir(pane);
        self.vcs.push(&workdir, &self.config.trunk_branch).await?;
        self.vcs.delete_branch(&workdir, branch).await?;
        Ok(())
    }

    /// Undo a conflicted merge attempt, preserving the pane's work on its
    /// original branch. Invokes merge-abort and hard-reset exactly once each.
    async fn abort(&self, pane: PaneId, branch: &str) -> EntryOutcome {
        info!(%pane, %branch, "aborting merge attempt");
        let _ = self.arena.with_pane(pane, |p| p.begin_abort());
        let workdir = self.config.pane_workdir(pane);

        if let Err(err) = self.vcs.abort_merge(&workdir).await {
            warn!(%pane, %err, "merge abort failed");
        }
        if let Err(err) = self.vcs.checkout(&workdir, branch).await {
            warn!(%pane, %err, "checkout of pane branch failed during abort");
        }
        if let Err(err) = self.vcs.hard_reset(&workdir, branch).await {
            warn!(%pane, %err, "hard reset failed during abort");
        }

        EntryOutcome::Aborted
    }

    /// Non-conflict failure: log, leave the pane on its branch for
    /// inspection, and let the queue advance.
    async fn entry_failed(&self, pane: PaneId, branch: &str, err: &VcsError) -> EntryOutcome {
        warn!(%pane, %branch, %err, kind = err.kind(), "merge entry failed");
        if let Err(err) = self.vcs.checkout(&self.config.pane_workdir(pane), branch).await {
            warn!(%pane, %err, "could not return pane to its branch");
        }
        EntryOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_is_fifo_and_deduplicated() {
        let queue = MergeQueue::new();
        assert!(queue.enqueue(PaneId(2)));
        assert!(queue.enqueue(PaneId(1)));
        assert!(!queue.enqueue(PaneId(2)));
        assert_eq!(queue.pending_len(), 2);

        assert_eq!(queue.take_next(), Some(PaneId(2)));
        assert_eq!(queue.take_next(), Some(PaneId(1)));
        assert_eq!(queue.take_next(), None);
    }

    #[test]
    fn merging_entry_still_blocks_reenqueue() {
        let queue = MergeQueue::new();
        queue.enqueue(PaneId(3));
        assert_eq!(queue.take_next(), Some(PaneId(3)));
        assert!(!queue.enqueue(PaneId(3)));
    }

    #[test]
    fn done_entry_allows_reenqueue_without_growth() {
        let queue = MergeQueue::new();
        queue.enqueue(PaneId(3));
        queue.take_next();
        queue.finish(PaneId(3));
        assert_eq!(queue.pending_len(), 0);

        assert!(queue.enqueue(PaneId(3)));
        assert_eq!(queue.snapshot().entries.len(), 1);
    }

    #[test]
    fn snapshot_reports_in_progress() {
        let queue = MergeQueue::new();
        queue.enqueue(PaneId(1));
        assert!(!queue.snapshot().in_progress);
        queue.take_next();
        assert!(queue.snapshot().in_progress);
        queue.finish(PaneId(1));
        let snap = queue.snapshot();
        assert!(!snap.in_progress);
        assert_eq!(snap.entries[0].status, QueueEntryStatus::Done);
    }
}
