#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use panemux_agent::ChangeAgent;
use panemux_core::{Orchestrator, OrchestratorConfig, PaneId, PaneSnapshot, PaneStatus};
use panemux_test_utils::{FakeAgent, FakeWorkingCopy};
use panemux_vcs::WorkingCopy;

pub(crate) struct Harness {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) vcs: Arc<FakeWorkingCopy>,
    pub(crate) agent: Arc<FakeAgent>,
}

pub(crate) fn harness() -> Harness {
    harness_with(OrchestratorConfig::new("/panes"))
}

pub(crate) fn harness_with(config: OrchestratorConfig) -> Harness {
    let vcs = FakeWorkingCopy::new();
    let agent = FakeAgent::new();
    agent.attach_vcs(Arc::clone(&vcs));
    let orchestrator = Orchestrator::new(
        config,
        Arc::clone(&vcs) as Arc<dyn WorkingCopy>,
        Arc::clone(&agent) as Arc<dyn ChangeAgent>,
    );
    Harness {
        orchestrator,
        vcs,
        agent,
    }
}

pub(crate) async fn pane_snapshot(h: &Harness, pane: PaneId) -> PaneSnapshot {
    h.orchestrator
        .state()
        .await
        .into_iter()
        .find(|s| s.pane_id == pane)
        .expect("pane present in state snapshot")
}

/// Poll until the pane reaches the given status, panicking after 5 seconds.
pub(crate) async fn wait_for_status(h: &Harness, pane: PaneId, want: PaneStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = pane_snapshot(h, pane).await;
        if snapshot.status == want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pane {pane} stuck in {:?}, wanted {want:?}",
            snapshot.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until no queue entry is pending or merging.
pub(crate) async fn wait_queue_drained(h: &Harness) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = h.orchestrator.merge_queue();
        let busy = snapshot.in_progress
            || snapshot
                .entries
                .iter()
                .any(|e| e.status != panemux_core::QueueEntryStatus::Done);
        if !busy {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "merge queue did not drain: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Index of the first recorded call equal to `call`, panicking if absent.
pub(crate) fn call_index(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("call {call:?} not found in {calls:?}"))
}
