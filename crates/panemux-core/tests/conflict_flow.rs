//! Conflicted merges: agent-delegated resolution and the abort path.

mod common;

use common::{call_index, harness, harness_with, pane_snapshot, wait_for_status, wait_queue_drained};
use panemux_core::{OrchestratorConfig, PaneId, PaneStatus, CONFLICT_COMMIT_MESSAGE};
use panemux_test_utils::FakeRun;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn resolved_conflict_finalizes_without_remerging() {
    let h = harness();
    let branch = h.orchestrator.create_pane(PaneId(1)).await.unwrap();
    h.vcs.push_merge_conflict(&["src/app.rs", "README.md"]);
    h.agent.push_run(FakeRun::success().resolving());

    h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap();
    wait_for_status(&h, PaneId(1), PaneStatus::OnTrunk).await;
    wait_queue_drained(&h).await;

    let calls = h.vcs.calls();
    // One merge attempt only; the resolution commit completes it.
    assert_eq!(h.vcs.call_count("merge"), 1);
    assert_eq!(h.vcs.call_count("abort_merge"), 0);
    assert!(calls.contains(&format!("commit {CONFLICT_COMMIT_MESSAGE}")));

    let commit = call_index(&calls, &format!("commit {CONFLICT_COMMIT_MESSAGE}"));
    let push = call_index(&calls, "push main");
    let delete = call_index(&calls, &format!("delete_branch {branch}"));
    assert!(commit < push && push < delete);
    assert_eq!(pane_snapshot(&h, PaneId(1)).await.branch, None);
}

#[tokio::test]
async fn failed_resolution_aborts_and_preserves_branch() {
    let h = harness();
    let branch = h.orchestrator.create_pane(PaneId(1)).await.unwrap();
    h.vcs.push_merge_conflict(&["src/app.rs"]);
    h.agent.push_run(FakeRun::failure(1));

    h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap();
    wait_for_status(&h, PaneId(1), PaneStatus::Active).await;
    wait_queue_drained(&h).await;

    assert_eq!(h.vcs.call_count("abort_merge"), 1);
    assert_eq!(h.vcs.call_count("hard_reset"), 1);
    let calls = h.vcs.calls();
    assert!(calls.contains(&format!("hard_reset {branch}")));
    assert_eq!(h.vcs.call_count("push"), 0);
    assert_eq!(h.vcs.call_count("delete_branch"), 0);

    let snapshot = pane_snapshot(&h, PaneId(1)).await;
    assert_eq!(snapshot.branch.as_deref(), Some(branch.as_str()));
}

#[tokio::test]
async fn residual_markers_after_successful_exit_force_abort() {
    let h = harness();
    h.orchestrator.create_pane(PaneId(1)).await.unwrap();
    h.vcs.push_merge_conflict(&["src/app.rs"]);
    // Agent exits 0 and even commits, but never cleaned the markers.
    h.agent.push_run(FakeRun::success().dirtying());

    h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap();
    wait_for_status(&h, PaneId(1), PaneStatus::Active).await;
    wait_queue_drained(&h).await;

    assert_eq!(h.vcs.call_count("abort_merge"), 1);
    assert_eq!(h.vcs.call_count("push"), 0);
}

#[tokio::test]
async fn exactly_one_resolution_attempt_per_conflict() {
    let h = harness();
    h.orchestrator.create_pane(PaneId(1)).await.unwrap();
    h.vcs.push_merge_conflict(&["src/app.rs"]);
    h.agent.push_run(FakeRun::failure(1));

    h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap();
    wait_for_status(&h, PaneId(1), PaneStatus::Active).await;
    wait_queue_drained(&h).await;

    assert_eq!(h.agent.instructions().len(), 1);
    assert_eq!(h.vcs.call_count("merge"), 1);
}

#[tokio::test]
async fn remediation_instruction_embeds_files_and_diff() {
    let h = harness();
    h.orchestrator.create_pane(PaneId(1)).await.unwrap();
    h.vcs.push_merge_conflict(&["src/app.rs", "docs/setup.md"]);
    h.vcs.set_diff_text("diff --git a/src/app.rs b/src/app.rs");
    h.agent.push_run(FakeRun::success().resolving());

    h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap();
    wait_for_status(&h, PaneId(1), PaneStatus::OnTrunk).await;

    let instructions = h.agent.instructions();
    assert_eq!(instructions.len(), 1);
    let text = &instructions[0];
    assert!(text.contains("src/app.rs"));
    assert!(text.contains("docs/setup.md"));
    assert!(text.contains("'main'"));
    assert!(text.contains("diff --git a/src/app.rs"));
    assert!(text.contains("do not push"));
}

#[tokio::test]
async fn oversized_diff_is_truncated_in_the_instruction() {
    let config = OrchestratorConfig::new("/panes").with_diff_limit(64);
    let h = harness_with(config);
    h.orchestrator.create_pane(PaneId(1)).await.unwrap();
    h.vcs.push_merge_conflict(&["src/app.rs"]);
    h.vcs.set_diff_text(&"x".repeat(10_000));
    h.agent.push_run(FakeRun::success().resolving());

    h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap();
    wait_for_status(&h, PaneId(1), PaneStatus::OnTrunk).await;

    let instructions = h.agent.instructions();
    let text = &instructions[0];
    assert!(text.contains("[diff truncated]"));
    assert!(!text.contains(&"x".repeat(100)));
}

#[tokio::test]
async fn aborted_pane_can_retry_the_merge_later() {
    let h = harness();
    h.orchestrator.create_pane(PaneId(1)).await.unwrap();
    h.vcs.push_merge_conflict(&["src/app.rs"]);
    h.agent.push_run(FakeRun::failure(1));

    h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap();
    wait_for_status(&h, PaneId(1), PaneStatus::Active).await;
    wait_queue_drained(&h).await;

    // A fresh explicit request; this time the merge is clean.
    assert!(h.orchestrator.enqueue_merge(PaneId(1)).await.unwrap());
    wait_for_status(&h, PaneId(1), PaneStatus::OnTrunk).await;
    assert_eq!(h.vcs.call_count("merge"), 2);
}
