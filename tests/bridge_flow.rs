mod common;

use std::{sync::Arc, time::Duration};

use common::{reply, text, GatedEngine, Harness, PerConversation};
use relay_bridge::{
    controller::Dispatch,
    engine::TaskEngine,
    format::STOPPED_MESSAGE,
    prompt::PROMPT_HEADER,
    types::{ConversationId, MessageHandle},
};

#[tokio::test(start_paused = true)]
async fn yes_reply_lets_the_action_run() {
    let mut h = Harness::new(Arc::new(GatedEngine::new(&["file-edit"])));
    let conv = ConversationId::new("c1");

    assert_eq!(
        h.controller.handle_inbound(text("c1", "fix the login bug")).await,
        Dispatch::TaskSpawned
    );
    assert!(h.next().await.text.contains("/work/repo"));

    let prompt = h.next().await;
    assert!(prompt.text.starts_with(PROMPT_HEADER));
    assert!(prompt.text.contains("file-edit"));
    assert!(prompt.text.contains("src/auth.js"));
    assert_eq!(h.controller.status().pending_approvals, 1);

    assert_eq!(
        h.controller.handle_inbound(reply("c1", &prompt.handle, "YES")).await,
        Dispatch::ReplyResolved
    );

    let result = h.next().await;
    assert!(result.text.contains("file-edit: allow"), "{}", result.text);
    assert!(result.text.contains("1 turn"));
    assert_eq!(h.controller.bridge().pending_count(), 0);
    assert!(!h.controller.tasks().is_active(&conv));
    assert_eq!(h.controller.sessions().get(&conv).as_deref(), Some("sess-c1"));
    assert!(!h.controller.bridge().trust().is_trusted(&conv, "file-edit"));
}

#[tokio::test(start_paused = true)]
async fn always_reply_trusts_the_kind_for_the_rest_of_the_conversation() {
    let mut h = Harness::new(Arc::new(GatedEngine::new(&["shell-exec", "shell-exec"])));

    h.controller.handle_inbound(text("c1", "run the tests")).await;
    let _started = h.next().await;
    let prompt = h.next().await;
    assert!(prompt.text.contains("npm test"));
    h.controller
        .handle_inbound(reply("c1", &prompt.handle, "always"))
        .await;

    // Second request of the same kind short-circuits: the next message is the result.
    let result = h.next().await;
    assert_eq!(
        result.text.lines().next(),
        Some("✅ shell-exec: allow, shell-exec: allow")
    );
    assert_eq!(h.controller.bridge().pending_count(), 0);

    // Another conversation is still asked.
    h.controller.handle_inbound(text("c2", "run the tests")).await;
    let _started = h.next().await;
    let prompt = h.next().await;
    assert_eq!(prompt.conversation_id, ConversationId::new("c2"));
    assert!(prompt.text.starts_with(PROMPT_HEADER));
    h.controller.handle_inbound(reply("c2", &prompt.handle, "no")).await;
    let _second_prompt = h.next().await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_prompt_times_out_and_late_reply_is_not_correlated() {
    let mut h = Harness::new(Arc::new(GatedEngine::new(&["network-fetch"])));

    h.controller.handle_inbound(text("c1", "check the docs")).await;
    let _started = h.next().await;
    let prompt = h.next().await;

    let notice = h.next().await;
    assert!(notice.text.contains("No reply in time"));
    let result = h.next().await;
    assert!(
        result.text.contains("network-fetch: deny (timed out)"),
        "{}",
        result.text
    );

    assert_eq!(h.controller.bridge().pending_count(), 0);
    assert!(!h.controller.bridge().on_reply_received(&prompt.handle, "yes"));
}

#[tokio::test(start_paused = true)]
async fn busy_conversation_rejects_while_another_runs_freely() {
    let engine = PerConversation {
        engines: vec![
            (
                ConversationId::new("c1"),
                Arc::new(GatedEngine::holding(&[])) as Arc<dyn TaskEngine>,
            ),
            (
                ConversationId::new("c2"),
                Arc::new(GatedEngine::new(&[])) as Arc<dyn TaskEngine>,
            ),
        ],
    };
    let mut h = Harness::new(Arc::new(engine));
    let c1 = ConversationId::new("c1");

    h.controller.handle_inbound(text("c1", "long refactor")).await;
    let started = h.next().await;
    assert_eq!(started.conversation_id, c1);
    assert!(h.controller.tasks().is_active(&c1));

    h.controller.handle_inbound(text("c1", "something else")).await;
    let busy = h.next().await;
    assert_eq!(busy.conversation_id, c1);
    assert!(busy.text.contains("already running"));

    h.controller.handle_inbound(text("c2", "quick fix")).await;
    let c2_started = h.next().await;
    assert_eq!(c2_started.conversation_id, ConversationId::new("c2"));
    let c2_result = h.next().await;
    assert!(c2_result.text.starts_with("✅"));

    assert!(h.controller.tasks().is_active(&c1));
    h.controller.handle_inbound(text("c1", "/stop")).await;
    let stopped = h.next().await;
    assert_eq!(stopped.conversation_id, c1);
    assert!(stopped.text.contains("stopped"));
    assert!(h.controller.tasks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn replies_to_unknown_handles_start_a_task() {
    let mut h = Harness::new(Arc::new(GatedEngine::new(&[])));
    let dispatched = h
        .controller
        .handle_inbound(reply("c1", &MessageHandle::new("msg-gone"), "carry on"))
        .await;
    assert_eq!(dispatched, Dispatch::TaskSpawned);
    let _started = h.next().await;
    assert!(h.next().await.text.starts_with("✅"));
}

#[tokio::test(start_paused = true)]
async fn stop_leaves_the_pending_approval_to_its_deadline() {
    let mut h = Harness::new(Arc::new(GatedEngine::holding(&["file-edit"])));
    let conv = ConversationId::new("c1");

    h.controller.handle_inbound(text("c1", "edit the config")).await;
    let _started = h.next().await;
    let prompt = h.next().await;
    assert!(prompt.text.contains("file-edit"));

    assert!(matches!(
        h.controller.handle_inbound(text("c1", "/stop")).await,
        Dispatch::CommandHandled(_)
    ));
    assert_eq!(h.next().await.text, STOPPED_MESSAGE);
    assert!(!h.controller.tasks().is_active(&conv));
    assert_eq!(h.controller.bridge().pending_count(), 1);

    tokio::time::sleep(Duration::from_millis(120_001)).await;
    assert_eq!(h.controller.bridge().pending_count(), 0);
    assert!(
        h.sent.try_recv().is_err(),
        "no timeout notice once the task is stopped"
    );
}
