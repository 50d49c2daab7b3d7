//! Permission bridge: turns an engine's approval-needed callback into a chat
//! round-trip and back into a verdict.
//!
//! Flow per request:
//! 1. a trusted action kind short-circuits to allow,
//! 2. otherwise the prompt is sent and its handle registered,
//! 3. the call suspends until a reply, the deadline or a drain resolves it,
//! 4. "always" adds the kind to the conversation's trust set.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::MessageChannel,
    correlation::CorrelationStore,
    events::EventEmitter,
    prompt::render_prompt,
    trust::TrustCache,
    types::{ConversationId, Decision, DenyReason, MessageHandle, Verdict},
};

pub struct PermissionBridge {
    channel: Arc<dyn MessageChannel>,
    store: Arc<CorrelationStore>,
    trust: Arc<TrustCache>,
    timeout: Duration,
    events: EventEmitter,
}

impl PermissionBridge {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        store: Arc<CorrelationStore>,
        trust: Arc<TrustCache>,
        timeout: Duration,
        events: EventEmitter,
    ) -> Self {
        Self {
            channel,
            store,
            trust,
            timeout,
            events,
        }
    }

    pub async fn on_approval_needed(
        &self,
        conversation: &ConversationId,
        action_kind: &str,
        action_detail: Value,
    ) -> Verdict {
        self.request_approval(conversation, action_kind, action_detail, None)
            .await
    }

    /// `task` is the cancel token of the task asking. Once it has fired nobody
    /// is waiting on the outcome, so a timeout is not announced.
    async fn request_approval(
        &self,
        conversation: &ConversationId,
        action_kind: &str,
        action_detail: Value,
        task: Option<&CancellationToken>,
    ) -> Verdict {
        if self.trust.is_trusted(conversation, action_kind) {
            tracing::debug!(
                target = "relay_bridge::bridge",
                conversation = %conversation,
                kind = %action_kind,
                "trusted action kind, skipping prompt"
            );
            return Verdict::Allow;
        }

        if self.store.is_closed() {
            return Verdict::deny(DenyReason::ShuttingDown.to_string());
        }

        let prompt = render_prompt(action_kind, &action_detail);
        // Nothing is registered until the prompt is actually out.
        let handle = match self.channel.send(conversation, &prompt).await {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(
                    target = "relay_bridge::bridge",
                    conversation = %conversation,
                    kind = %action_kind,
                    error = %error,
                    "failed to deliver approval prompt"
                );
                return Verdict::deny(format!("could not deliver approval prompt: {error}"));
            }
        };

        self.events.emit(
            "approval_requested",
            json!({
                "conversation": conversation,
                "handle": handle,
                "kind": action_kind,
                "timeout_ms": self.timeout.as_millis() as u64,
            }),
        );
        tracing::info!(
            target = "relay_bridge::bridge",
            conversation = %conversation,
            handle = %handle,
            kind = %action_kind,
            "awaiting approval"
        );

        let pending = self.store.register(
            handle.clone(),
            conversation.clone(),
            action_kind,
            action_detail,
            self.timeout,
        );
        let decision = pending.wait().await;

        self.events.emit(
            "approval_resolved",
            json!({
                "conversation": conversation,
                "handle": handle,
                "kind": action_kind,
                "decision": decision,
            }),
        );

        match decision {
            Decision::Allow => Verdict::Allow,
            Decision::AllowAndTrust => {
                self.trust.trust(conversation, action_kind);
                Verdict::Allow
            }
            Decision::Deny(reason) => {
                if reason == DenyReason::TimedOut {
                    if task.is_some_and(CancellationToken::is_cancelled) {
                        tracing::debug!(
                            target = "relay_bridge::bridge",
                            conversation = %conversation,
                            kind = %action_kind,
                            "approval timed out after its task ended, not announcing"
                        );
                    } else {
                        self.notify_timeout(conversation, action_kind).await;
                    }
                }
                Verdict::deny(reason.to_string())
            }
        }
    }

    /// Feed a correlated reply. `false` means the handle is not pending and the
    /// text should be treated as ordinary input.
    pub fn on_reply_received(&self, handle: &MessageHandle, raw_text: &str) -> bool {
        self.store.resolve_by_handle(handle, raw_text)
    }

    /// Gate bound to one conversation, handed to the task engine.
    pub fn gate(self: &Arc<Self>, conversation: ConversationId) -> ApprovalGate {
        ApprovalGate {
            bridge: Arc::clone(self),
            conversation,
            task: None,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.store.len()
    }

    pub fn pending_kinds(&self, conversation: &ConversationId) -> Vec<String> {
        self.store.pending_kinds(conversation)
    }

    pub fn trust(&self) -> &TrustCache {
        &self.trust
    }

    /// Deny every outstanding approval with "shutting down".
    pub fn drain(&self) -> usize {
        self.store.drain()
    }

    async fn notify_timeout(&self, conversation: &ConversationId, action_kind: &str) {
        let notice = format!("⌛ No reply in time; {action_kind} was denied.");
        if let Err(error) = self.channel.send(conversation, &notice).await {
            tracing::debug!(target = "relay_bridge::bridge", error = %error, "timeout notice not delivered");
        }
    }
}

/// The sensitive-action gate a task engine calls; bound to one conversation.
#[derive(Clone)]
pub struct ApprovalGate {
    bridge: Arc<PermissionBridge>,
    conversation: ConversationId,
    task: Option<CancellationToken>,
}

impl ApprovalGate {
    /// Tie the gate to the cancel token of the task it serves.
    pub fn bound_to(mut self, task: CancellationToken) -> Self {
        self.task = Some(task);
        self
    }

    pub async fn request(&self, action_kind: &str, action_detail: Value) -> Verdict {
        self.bridge
            .request_approval(
                &self.conversation,
                action_kind,
                action_detail,
                self.task.as_ref(),
            )
            .await
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }
}
