mod common;

use std::{sync::Arc, time::Duration};

use common::{text, GatedEngine, Harness};
use relay_bridge::{controller::Dispatch, types::ConversationId};

#[tokio::test(start_paused = true)]
async fn shutdown_empties_store_and_registry() {
    let mut h = Harness::new(Arc::new(GatedEngine::new(&["file-edit"])));

    for conv in ["c1", "c2", "c3"] {
        h.controller.handle_inbound(text(conv, "edit things")).await;
    }
    // Each conversation posts a started notice and then a prompt.
    for _ in 0..6 {
        h.next().await;
    }
    let status = h.controller.status();
    assert_eq!(status.active_tasks, 3);
    assert_eq!(status.pending_approvals, 3);

    let report = h.controller.shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.cancelled_tasks, 3);
    assert_eq!(report.denied_approvals, 3);
    assert!(!report.timed_out);

    assert_eq!(h.controller.bridge().pending_count(), 0);
    assert!(h.controller.tasks().is_empty());
    for conv in ["c1", "c2", "c3"] {
        assert!(!h.controller.tasks().is_active(&ConversationId::new(conv)));
    }

    assert_eq!(
        h.controller.handle_inbound(text("c1", "again")).await,
        Dispatch::ShuttingDown
    );
}

#[tokio::test(start_paused = true)]
async fn task_dispatched_just_before_shutdown_never_starts() {
    let mut h = Harness::new(Arc::new(GatedEngine::holding(&[])));
    let conv = ConversationId::new("c1");

    // The task is spawned but has not claimed its slot when the drain begins.
    assert_eq!(
        h.controller.handle_inbound(text("c1", "long job")).await,
        Dispatch::TaskSpawned
    );
    let report = h.controller.shutdown(Duration::from_secs(5)).await;

    assert_eq!(report.cancelled_tasks, 0);
    assert!(!report.timed_out, "the late task must not outlive the drain");
    assert!(h.controller.tasks().is_empty());
    assert!(!h.controller.tasks().is_active(&conv));
    assert!(h.sent.try_recv().is_err(), "a refused task posts nothing");
}

#[tokio::test(start_paused = true)]
async fn approvals_requested_after_drain_are_denied_at_once() {
    let mut h = Harness::new(Arc::new(GatedEngine::new(&[])));
    h.controller.shutdown(Duration::from_millis(10)).await;

    let verdict = h
        .controller
        .bridge()
        .on_approval_needed(&ConversationId::new("c1"), "file-edit", serde_json::json!({}))
        .await;
    assert_eq!(verdict, relay_bridge::types::Verdict::deny("shutting down"));
    assert_eq!(h.controller.bridge().pending_count(), 0);
    assert!(h.sent.try_recv().is_err(), "no prompt is sent once closed");
}
