//! Orchestrator facade
//!
//! Owns the pane arena, the run supervisor, and the merge worker, and
//! exposes the command surface the presentation layer calls: create,
//! start-agent, enqueue-merge, discard, plus state snapshots. Multi-step
//! command sequences serialize on the pane's operation lock so no two
//! commands interleave their VCS work on the same tree.

use std::sync::Arc;

use panemux_agent::ChangeAgent;
use panemux_vcs::WorkingCopy;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::divergence::{self, Divergence};
use crate::error::OrchestratorError;
use crate::merge_queue::{MergeQueue, MergeWorker, MergeWorkerHandle};
use crate::pane::PaneArena;
use crate::resolve::AgentConflictResolver;
use crate::supervisor::{AgentRunSupervisor, OutputStream};
use crate::types::{
    branch_name, MergeQueueSnapshot, OrchestratorConfig, PaneId, PaneSnapshot, PaneStatus,
};

/// Single-process pane and merge orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    vcs: Arc<dyn WorkingCopy>,
    arena: Arc<PaneArena>,
    supervisor: Arc<AgentRunSupervisor>,
    queue: Arc<MergeQueue>,
    worker: Mutex<Option<MergeWorkerHandle>>,
}

impl Orchestrator {
    /// Build the orchestrator and spawn its merge worker.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        vcs: Arc<dyn WorkingCopy>,
        agent: Arc<dyn ChangeAgent>,
    ) -> Arc<Self> {
        let arena = Arc::new(PaneArena::new(config.pool_size));
        let supervisor = Arc::new(AgentRunSupervisor::new(
            agent,
            Arc::clone(&vcs),
            Arc::clone(&arena),
        ));
        let queue = Arc::new(MergeQueue::new());
        let resolver = Arc::new(AgentConflictResolver::new(
            Arc::clone(&supervisor),
            Arc::clone(&vcs),
        ));
        let worker = MergeWorker::new(
            Arc::clone(&vcs),
            Arc::clone(&arena),
            Arc::clone(&queue),
            resolver,
            config.clone(),
        )
        .spawn();

        Arc::new(Self {
            config,
            vcs,
            arena,
            supervisor,
            queue,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Cut a fresh branch for a free pane: checkout trunk, pull, create and
    /// checkout `tmp-{id}-{random6}`. Returns the branch name.
    pub async fn create_pane(&self, pane: PaneId) -> Result<String, OrchestratorError> {
        let op = self.arena.op_lock(pane)?;
        let _guard = op.lock().await;

        self.arena.with_pane(pane, |p| {
            if p.status == PaneStatus::OnTrunk {
                Ok(())
            } else {
                Err(OrchestratorError::AlreadyActive(pane))
            }
        })??;

        let workdir = self.config.pane_workdir(pane);
        let trunk = self.config.trunk_branch.as_str();
        self.vcs.checkout(&workdir, trunk).await?;
        self.vcs.pull(&workdir, trunk).await?;
        let branch = branch_name(pane);
        self.vcs.create_branch(&workdir, &branch).await?;

        self.arena.with_pane(pane, |p| p.activate(branch.clone()))??;
        info!(%pane, %branch, "pane created");
        Ok(branch)
    }

    /// Start an interactive agent run on an active pane.
    pub async fn start_agent(
        &self,
        pane: PaneId,
        instruction: &str,
    ) -> Result<OutputStream, OrchestratorError> {
        let op = self.arena.op_lock(pane)?;
        let _guard = op.lock().await;
        let workdir = self.config.pane_workdir(pane);
        self.supervisor.start(pane, workdir, instruction).await
    }

    /// Attach to an in-flight run's output, replaying everything so far.
    #[must_use]
    pub fn subscribe_output(&self, pane: PaneId) -> Option<OutputStream> {
        self.supervisor.subscribe(pane)
    }

    /// Queue a pane for merging into trunk. Returns false when the pane was
    /// already queued (a no-op, not an error).
    pub async fn enqueue_merge(&self, pane: PaneId) -> Result<bool, OrchestratorError> {
        let op = self.arena.op_lock(pane)?;
        let _guard = op.lock().await;

        let newly_queued = self.arena.with_pane(pane, |p| p.request_merge())??;
        if newly_queued {
            if !self.queue.enqueue(pane) {
                // The queue still holds a live entry for this pane; roll the
                // status back so the caller can retry once it drains.
                warn!(%pane, "pane already present in merge queue");
                self.arena.with_pane(pane, |p| p.merge_failed())?;
                return Ok(false);
            }
            info!(%pane, "merge enqueued");
        }
        Ok(newly_queued)
    }

    /// Return a pane to the pool: drop uncommitted changes, reset the tree
    /// to trunk, force-delete the branch. Idempotent for panes already on
    /// trunk; rejected while an agent or the merge worker owns the tree.
    pub async fn discard(&self, pane: PaneId) -> Result<(), OrchestratorError> {
        let op = self.arena.op_lock(pane)?;
        let _guard = op.lock().await;

        let branch = self
            .arena
            .with_pane(pane, |p| p.discard_guard().map(|()| p.branch.clone()))??;
        let Some(branch) = branch else {
            return Ok(());
        };

        let workdir = self.config.pane_workdir(pane);
        let trunk = self.config.trunk_branch.as_str();
        self.vcs.discard_changes(&workdir).await?;
        self.vcs.checkout(&workdir, trunk).await?;
        self.vcs.hard_reset(&workdir, trunk).await?;
        self.vcs.delete_branch(&workdir, &branch).await?;

        self.arena.with_pane(pane, |p| p.reset())?;
        info!(%pane, %branch, "pane discarded");
        Ok(())
    }

    /// Set the cosmetic pane title.
    pub fn set_title(&self, pane: PaneId, title: Option<String>) -> Result<(), OrchestratorError> {
        self.arena.with_pane(pane, |p| p.title = title)
    }

    /// Snapshot every pane, recomputing divergence from the VCS for each
    /// active one.
    pub async fn state(&self) -> Vec<PaneSnapshot> {
        let remote_trunk = self.config.remote_trunk();
        let mut snapshots = Vec::with_capacity(self.arena.pool_size() as usize);
        for pane in self.arena.panes() {
            let divergence = match &pane.branch {
                Some(branch) => {
                    divergence::compute(
                        self.vcs.as_ref(),
                        &self.config.pane_workdir(pane.id),
                        branch,
                        &remote_trunk,
                    )
                    .await
                }
                None => Divergence::default(),
            };
            let agent_running = pane.agent_running();
            snapshots.push(PaneSnapshot {
                pane_id: pane.id,
                active: pane.status.is_active(),
                status: pane.status,
                branch: pane.branch,
                is_ahead: divergence.is_ahead,
                is_stale: divergence.is_stale,
                agent_running,
                title: pane.title,
            });
        }
        snapshots
    }

    /// Current merge queue contents.
    #[must_use]
    pub fn merge_queue(&self) -> MergeQueueSnapshot {
        self.queue.snapshot()
    }

    /// Ids of pane slots currently free.
    #[must_use]
    pub fn free_panes(&self) -> Vec<PaneId> {
        self.arena.free_ids()
    }

    /// True while an agent run owns the pane's tree.
    #[must_use]
    pub fn agent_running(&self, pane: PaneId) -> bool {
        self.supervisor.is_running(pane)
    }

    /// Stop the merge worker once any in-flight entry completes. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}
