//! Agent run supervisor
//!
//! Starts at most one change-agent invocation per pane, exposes its output
//! as an ordered, replayable event stream, and commits the working tree
//! before completion becomes visible - a consumer observing `Completed` can
//! immediately trust the pane's git state.
//!
//! Two entry points:
//! - `start`: interactive runs; the instruction text becomes the commit
//!   message and the pane transitions AgentRunning -> Active on completion.
//! - `run_synchronous`: conflict-resolution runs; returns only after full
//!   completion, commits as "Resolved merge conflicts" on success, and
//!   leaves pane status to the caller.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use panemux_agent::{AgentEvent, AgentExit, ChangeAgent};
use panemux_vcs::WorkingCopy;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::pane::PaneArena;
use crate::types::PaneId;

/// Fixed commit message for conflict-resolution runs.
pub const CONFLICT_COMMIT_MESSAGE: &str = "Resolved merge conflicts";

const BROADCAST_CAPACITY: usize = 1024;

/// One element of a run's output stream. `Completed` is always last and is
/// delivered exactly once per run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A chunk of agent output.
    Output(String),
    /// The run finished; the commit step has already happened.
    Completed(AgentExit),
}

/// Ordered view of one run's output.
///
/// Subscribers attached mid-run first replay everything emitted so far,
/// then continue live.
#[derive(Debug)]
pub struct OutputStream {
    replay: VecDeque<RunEvent>,
    rx: broadcast::Receiver<RunEvent>,
}

impl OutputStream {
    /// Next event, or `None` once the run is over and fully drained.
    pub async fn next(&mut self) -> Option<RunEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "output subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain until completion, returning output lines and the exit status.
    pub async fn drain(&mut self) -> (Vec<String>, Option<AgentExit>) {
        let mut lines = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                RunEvent::Output(line) => lines.push(line),
                RunEvent::Completed(exit) => return (lines, Some(exit)),
            }
        }
        (lines, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Interactive,
    ConflictResolution,
}

struct RunChannel {
    buffer: Vec<RunEvent>,
    tx: broadcast::Sender<RunEvent>,
}

impl RunChannel {
    fn emit(&mut self, event: RunEvent) {
        self.buffer.push(event.clone());
        // Send failures just mean nobody is listening right now; the buffer
        // still serves late subscribers.
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> OutputStream {
        OutputStream {
            replay: self.buffer.iter().cloned().collect(),
            rx: self.tx.subscribe(),
        }
    }
}

type RunMap = Arc<DashMap<PaneId, Arc<Mutex<RunChannel>>>>;

/// Supervises change-agent invocations, one at most per pane.
pub struct AgentRunSupervisor {
    agent: Arc<dyn ChangeAgent>,
    vcs: Arc<dyn WorkingCopy>,
    arena: Arc<PaneArena>,
    runs: RunMap,
}

impl AgentRunSupervisor {
    /// Create a supervisor over the given collaborators.
    #[must_use]
    pub fn new(
        agent: Arc<dyn ChangeAgent>,
        vcs: Arc<dyn WorkingCopy>,
        arena: Arc<PaneArena>,
    ) -> Self {
        Self {
            agent,
            vcs,
            arena,
            runs: Arc::new(DashMap::new()),
        }
    }

    /// True while a run (interactive or resolution) owns the pane's tree.
    #[inline]
    #[must_use]
    pub fn is_running(&self, pane: PaneId) -> bool {
        self.runs.contains_key(&pane)
    }

    /// Attach to a run already in flight, replaying output emitted so far.
    #[must_use]
    pub fn subscribe(&self, pane: PaneId) -> Option<OutputStream> {
        self.runs.get(&pane).map(|chan| chan.lock().subscribe())
    }

    /// Start an interactive run; the pane must be `Active`.
    ///
    /// On launch failure the pane stays `Active` and no commit is attempted.
    pub async fn start(
        &self,
        pane: PaneId,
        workdir: PathBuf,
        instruction: &str,
    ) -> Result<OutputStream, OrchestratorError> {
        self.arena.with_pane(pane, |p| p.begin_run())??;

        let handle = match self.agent.start(&workdir, instruction).await {
            Ok(handle) => handle,
            Err(err) => {
                self.arena.with_pane(pane, |p| p.finish_run())?;
                return Err(OrchestratorError::AgentLaunch(err));
            }
        };

        info!(%pane, "agent run started");
        Ok(self.attach(
            pane,
            RunKind::Interactive,
            instruction.to_string(),
            workdir,
            handle,
        ))
    }

    /// Run the agent to completion for conflict resolution.
    ///
    /// Pane status is owned by the caller; the commit message is fixed and
    /// only applied on a successful exit.
    pub async fn run_synchronous(
        &self,
        pane: PaneId,
        workdir: PathBuf,
        instruction: &str,
    ) -> Result<AgentExit, OrchestratorError> {
        if self.is_running(pane) {
            return Err(OrchestratorError::AgentBusy(pane));
        }
        let handle = self
            .agent
            .start(&workdir, instruction)
            .await
            .map_err(OrchestratorError::AgentLaunch)?;

        info!(%pane, "synchronous resolution run started");
        let mut stream = self.attach(
            pane,
            RunKind::ConflictResolution,
            CONFLICT_COMMIT_MESSAGE.to_string(),
            workdir,
            handle,
        );
        let (_, exit) = stream.drain().await;
        Ok(exit.unwrap_or(AgentExit { code: None }))
    }

    fn attach(
        &self,
        pane: PaneId,
        kind: RunKind,
        commit_message: String,
        workdir: PathBuf,
        handle: panemux_agent::AgentHandle,
    ) -> OutputStream {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let channel = Arc::new(Mutex::new(RunChannel {
            buffer: Vec::new(),
            tx,
        }));
        self.runs.insert(pane, Arc::clone(&channel));
        let stream = channel.lock().subscribe();

        tokio::spawn(drive(
            Arc::clone(&self.vcs),
            Arc::clone(&self.arena),
            Arc::clone(&self.runs),
            pane,
            kind,
            commit_message,
            workdir,
            handle,
        ));
        stream
    }
}

fn emit(runs: &RunMap, pane: PaneId, event: RunEvent) {
    if let Some(channel) = runs.get(&pane) {
        channel.lock().emit(event);
    }
}

/// Drains one agent invocation to completion: forwards output, performs the
/// commit step, restores the pane status, and emits `Completed` last.
#[allow(clippy::too_many_arguments)]
async fn drive(
    vcs: Arc<dyn WorkingCopy>,
    arena: Arc<PaneArena>,
    runs: RunMap,
    pane: PaneId,
    kind: RunKind,
    commit_message: String,
    workdir: PathBuf,
    mut handle: panemux_agent::AgentHandle,
) {
    let exit = loop {
        match handle.next_event().await {
            Some(AgentEvent::Output(line)) => emit(&runs, pane, RunEvent::Output(line)),
            Some(AgentEvent::Exited(exit)) => break exit,
            // The stream died without an exit event; treat as a failure
            // so the pane still unsticks.
            None => break AgentExit { code: None },
        }
    };

    let should_commit = kind == RunKind::Interactive || exit.success();
    if should_commit {
        match vcs.commit_all(&workdir, &commit_message).await {
            Ok(Some(sha)) => {
                let short = &sha[..sha.len().min(7)];
                info!(%pane, sha = short, "committed agent changes");
                emit(&runs, pane, RunEvent::Output(format!("Committed changes: {short}")));
            }
            Ok(None) => debug!(%pane, "agent run left the tree clean"),
            Err(err) => {
                warn!(%pane, %err, "commit after agent run failed");
                emit(
                    &runs,
                    pane,
                    RunEvent::Output(format!("Failed to commit changes: {err}")),
                );
            }
        }
    }

    if kind == RunKind::Interactive {
        if let Err(err) = arena.with_pane(pane, |p| p.finish_run()) {
            warn!(%pane, %err, "pane vanished during agent run");
        }
    }

    emit(&runs, pane, RunEvent::Completed(exit));
    runs.remove(&pane);
    debug!(%pane, code = ?exit.code, "agent run finished");
}
