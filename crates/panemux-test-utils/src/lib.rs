//! Testing utilities for the panemux workspace
//!
//! Scriptable fakes for the two external collaborators: the VCS layer and
//! the change agent. Both record every call so tests can assert ordering,
//! counts, and payloads.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use panemux_agent::{AgentError, AgentEvent, AgentExit, AgentHandle, ChangeAgent};
use panemux_vcs::{MergeOutcome, VcsError, WorkingCopy};

fn command_failed(command: &str, stderr: &str) -> VcsError {
    VcsError::CommandFailed {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Scripted result for one `merge_no_ff` call.
#[derive(Debug, Clone)]
enum FakeMergeResult {
    Clean,
    Conflict(Vec<String>),
    Error(String),
}

#[derive(Debug, Default)]
struct FakeVcsState {
    calls: Vec<String>,
    merge_script: VecDeque<FakeMergeResult>,
    commit_counts: Vec<(String, usize)>,
    dirty: bool,
    unmerged: Vec<String>,
    conflict_markers: bool,
    diff_text: String,
    current_branch: String,
    fail_fetch: bool,
    fail_commit_counts: bool,
    fail_push: bool,
    commit_serial: u64,
}

/// In-memory working copy with scriptable merge results and divergence
/// counts. All operations succeed unless told otherwise.
#[derive(Debug)]
pub struct FakeWorkingCopy {
    state: Mutex<FakeVcsState>,
    merge_delay: Mutex<Option<Duration>>,
    merges_in_flight: Mutex<usize>,
    max_concurrent: Mutex<usize>,
}

impl FakeWorkingCopy {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeVcsState {
                current_branch: "main".to_string(),
                ..FakeVcsState::default()
            }),
            merge_delay: Mutex::new(None),
            merges_in_flight: Mutex::new(0),
            max_concurrent: Mutex::new(0),
        })
    }

    /// Every call made so far, in order, e.g. `"merge tmp-1-abc123"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls whose name matches `op`.
    #[must_use]
    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    /// Script the next merge to conflict on the given files.
    pub fn push_merge_conflict(&self, files: &[&str]) {
        self.state
            .lock()
            .merge_script
            .push_back(FakeMergeResult::Conflict(
                files.iter().map(|f| (*f).to_string()).collect(),
            ));
    }

    /// Script the next merge to fail with a VCS error.
    pub fn push_merge_error(&self, stderr: &str) {
        self.state
            .lock()
            .merge_script
            .push_back(FakeMergeResult::Error(stderr.to_string()));
    }

    /// Script the next merge to succeed (the default when the script is empty).
    pub fn push_merge_clean(&self) {
        self.state.lock().merge_script.push_back(FakeMergeResult::Clean);
    }

    /// Make every merge call sleep, to let tests observe serialization.
    pub fn set_merge_delay(&self, delay: Duration) {
        *self.merge_delay.lock() = Some(delay);
    }

    /// Highest number of merges ever observed in flight at once.
    #[must_use]
    pub fn max_concurrent_merges(&self) -> usize {
        *self.max_concurrent.lock()
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.state.lock().dirty = dirty;
    }

    pub fn set_commit_count(&self, range: &str, count: usize) {
        self.state
            .lock()
            .commit_counts
            .push((range.to_string(), count));
    }

    pub fn set_unmerged(&self, paths: &[&str]) {
        self.state.lock().unmerged = paths.iter().map(|p| (*p).to_string()).collect();
    }

    pub fn set_conflict_markers(&self, present: bool) {
        self.state.lock().conflict_markers = present;
    }

    pub fn set_diff_text(&self, diff: &str) {
        self.state.lock().diff_text = diff.to_string();
    }

    pub fn fail_fetch(&self) {
        self.state.lock().fail_fetch = true;
    }

    pub fn fail_commit_counts(&self) {
        self.state.lock().fail_commit_counts = true;
    }

    pub fn fail_push(&self) {
        self.state.lock().fail_push = true;
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl WorkingCopy for FakeWorkingCopy {
    async fn current_branch(&self, _workdir: &Path) -> Result<String, VcsError> {
        Ok(self.state.lock().current_branch.clone())
    }

    async fn checkout(&self, _workdir: &Path, refname: &str) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.calls.push(format!("checkout {refname}"));
        state.current_branch = refname.to_string();
        Ok(())
    }

    async fn pull(&self, _workdir: &Path, branch: &str) -> Result<(), VcsError> {
        self.record(format!("pull {branch}"));
        Ok(())
    }

    async fn fetch(&self, _workdir: &Path) -> Result<(), VcsError> {
        let fail = {
            let mut state = self.state.lock();
            state.calls.push("fetch".to_string());
            state.fail_fetch
        };
        if fail {
            return Err(command_failed("fetch", "remote unreachable"));
        }
        Ok(())
    }

    async fn create_branch(&self, _workdir: &Path, name: &str) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.calls.push(format!("create_branch {name}"));
        state.current_branch = name.to_string();
        Ok(())
    }

    async fn is_dirty(&self, _workdir: &Path) -> Result<bool, VcsError> {
        Ok(self.state.lock().dirty)
    }

    async fn discard_changes(&self, _workdir: &Path) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.calls.push("discard_changes".to_string());
        state.dirty = false;
        Ok(())
    }

    async fn commit_all(&self, _workdir: &Path, message: &str) -> Result<Option<String>, VcsError> {
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(None);
        }
        state.dirty = false;
        state.commit_serial += 1;
        let sha = format!("fake{:036}", state.commit_serial);
        state.calls.push(format!("commit {message}"));
        Ok(Some(sha))
    }

    async fn merge_no_ff(
        &self,
        _workdir: &Path,
        branch: &str,
        _message: &str,
    ) -> Result<MergeOutcome, VcsError> {
        let (result, delay) = {
            let mut state = self.state.lock();
            state.calls.push(format!("merge {branch}"));
            let result = state
                .merge_script
                .pop_front()
                .unwrap_or(FakeMergeResult::Clean);
            (result, *self.merge_delay.lock())
        };

        {
            let mut in_flight = self.merges_in_flight.lock();
            *in_flight += 1;
            let mut max = self.max_concurrent.lock();
            *max = (*max).max(*in_flight);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        *self.merges_in_flight.lock() -= 1;

        match result {
            FakeMergeResult::Clean => Ok(MergeOutcome::Clean),
            FakeMergeResult::Conflict(files) => {
                let mut state = self.state.lock();
                state.unmerged = files.clone();
                state.conflict_markers = true;
                Ok(MergeOutcome::Conflict { files })
            }
            FakeMergeResult::Error(stderr) => Err(command_failed("merge", &stderr)),
        }
    }

    async fn diff(&self, _workdir: &Path, _from: &str, _to: &str) -> Result<String, VcsError> {
        let state = self.state.lock();
        Ok(state.diff_text.clone())
    }

    async fn abort_merge(&self, _workdir: &Path) -> Result<(), VcsError> {
        let mut state = self.state.lock();
        state.calls.push("abort_merge".to_string());
        state.unmerged.clear();
        state.conflict_markers = false;
        Ok(())
    }

    async fn hard_reset(&self, _workdir: &Path, refname: &str) -> Result<(), VcsError> {
        self.record(format!("hard_reset {refname}"));
        Ok(())
    }

    async fn delete_branch(&self, _workdir: &Path, name: &str) -> Result<(), VcsError> {
        self.record(format!("delete_branch {name}"));
        Ok(())
    }

    async fn push(&self, _workdir: &Path, branch: &str) -> Result<(), VcsError> {
        let fail = {
            let mut state = self.state.lock();
            state.calls.push(format!("push {branch}"));
            state.fail_push
        };
        if fail {
            return Err(command_failed("push", "rejected"));
        }
        Ok(())
    }

    async fn commit_count(&self, _workdir: &Path, range: &str) -> Result<usize, VcsError> {
        let state = self.state.lock();
        if state.fail_commit_counts {
            return Err(command_failed("rev-list", "bad revision"));
        }
        Ok(state
            .commit_counts
            .iter()
            .rev()
            .find(|(r, _)| r == range)
            .map(|(_, c)| *c)
            .unwrap_or(0))
    }

    async fn unmerged_paths(&self, _workdir: &Path) -> Result<Vec<String>, VcsError> {
        Ok(self.state.lock().unmerged.clone())
    }

    async fn has_conflict_markers(&self, _workdir: &Path) -> Result<bool, VcsError> {
        Ok(self.state.lock().conflict_markers)
    }
}

/// Script for one fake agent invocation.
#[derive(Debug, Clone)]
pub struct FakeRun {
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
    pub delay: Option<Duration>,
    /// Mark the shared working copy dirty before exiting, as a real agent
    /// editing files would.
    pub dirties_tree: bool,
    /// Clear unmerged paths and conflict markers before exiting, as an agent
    /// that successfully resolved a conflicted merge would.
    pub resolves_conflicts: bool,
}

impl FakeRun {
    #[must_use]
    pub fn success() -> Self {
        Self {
            lines: Vec::new(),
            exit_code: Some(0),
            delay: None,
            dirties_tree: false,
            resolves_conflicts: false,
        }
    }

    #[must_use]
    pub fn failure(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::success()
        }
    }

    #[must_use]
    pub fn with_lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| (*l).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn dirtying(mut self) -> Self {
        self.dirties_tree = true;
        self
    }

    /// The run edits away all conflict residue and leaves the tree dirty
    /// for the resolution commit.
    #[must_use]
    pub fn resolving(mut self) -> Self {
        self.resolves_conflicts = true;
        self.dirties_tree = true;
        self
    }
}

#[derive(Debug, Default)]
struct FakeAgentState {
    script: VecDeque<FakeRun>,
    instructions: Vec<String>,
    fail_launch: bool,
}

/// Change agent that replays scripted runs instead of spawning processes.
#[derive(Debug)]
pub struct FakeAgent {
    state: Mutex<FakeAgentState>,
    /// When set, runs mark this working copy dirty on `dirties_tree`.
    vcs: Mutex<Option<Arc<FakeWorkingCopy>>>,
}

impl FakeAgent {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeAgentState::default()),
            vcs: Mutex::new(None),
        })
    }

    /// Wire the agent to a fake working copy so `dirtying` runs take effect.
    pub fn attach_vcs(&self, vcs: Arc<FakeWorkingCopy>) {
        *self.vcs.lock() = Some(vcs);
    }

    /// Queue the script for the next invocation. Unscripted invocations
    /// succeed with no output and no edits.
    pub fn push_run(&self, run: FakeRun) {
        self.state.lock().script.push_back(run);
    }

    /// Make the next `start` fail before producing output.
    pub fn fail_next_launch(&self) {
        self.state.lock().fail_launch = true;
    }

    /// Instructions received so far, in order.
    #[must_use]
    pub fn instructions(&self) -> Vec<String> {
        self.state.lock().instructions.clone()
    }
}

#[async_trait]
impl ChangeAgent for FakeAgent {
    async fn start(&self, _workdir: &Path, instruction: &str) -> Result<AgentHandle, AgentError> {
        let run = {
            let mut state = self.state.lock();
            if state.fail_launch {
                state.fail_launch = false;
                return Err(AgentError::Launch {
                    program: "fake-agent".to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            state.instructions.push(instruction.to_string());
            state.script.pop_front().unwrap_or_else(FakeRun::success)
        };
        let vcs = self.vcs.lock().clone();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if let Some(delay) = run.delay {
                tokio::time::sleep(delay).await;
            }
            for line in run.lines {
                if tx.send(AgentEvent::Output(line)).await.is_err() {
                    return;
                }
            }
            if let Some(vcs) = vcs {
                if run.resolves_conflicts {
                    vcs.set_unmerged(&[]);
                    vcs.set_conflict_markers(false);
                }
                if run.dirties_tree {
                    vcs.set_dirty(true);
                }
            }
            let _ = tx
                .send(AgentEvent::Exited(AgentExit {
                    code: run.exit_code,
                }))
                .await;
        });
        Ok(AgentHandle::new(rx))
    }
}
