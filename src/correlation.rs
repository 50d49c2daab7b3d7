//! Pending-approval registry keyed by prompt handle.
//!
//! Each entry owns a one-shot decision sink and a deadline timer. Resolution
//! always removes the entry under the lock first and only then completes the
//! sink, so whichever of reply, timeout or drain gets there first wins and the
//! others find nothing to do.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};

use crate::types::{ConversationId, Decision, DenyReason, MessageHandle};

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_millis(120_000);

struct PendingApproval {
    conversation: ConversationId,
    action_kind: String,
    action_detail: Value,
    expires_at: Instant,
    sink: oneshot::Sender<Decision>,
    timer: JoinHandle<()>,
}

impl PendingApproval {
    fn complete(self, handle: &MessageHandle, decision: Decision) {
        tracing::debug!(
            target = "relay_bridge::correlation",
            handle = %handle,
            conversation = %self.conversation,
            kind = %self.action_kind,
            detail = %self.action_detail,
            decision = decision.label(),
            "approval resolved"
        );
        // The waiter may have gone away (task cancelled); nothing to deliver then.
        let _ = self.sink.send(decision);
    }
}

/// Future side of a registered approval.
#[derive(Debug)]
pub struct PendingDecision {
    handle: MessageHandle,
    rx: oneshot::Receiver<Decision>,
}

impl PendingDecision {
    pub fn handle(&self) -> &MessageHandle {
        &self.handle
    }

    /// Wait for the single decision. A store dropped without resolving the
    /// entry counts as a shutdown.
    pub async fn wait(self) -> Decision {
        self.rx
            .await
            .unwrap_or(Decision::Deny(DenyReason::ShuttingDown))
    }
}

#[derive(Default)]
struct StoreState {
    pending: HashMap<MessageHandle, PendingApproval>,
    /// Set by `drain`; checked under the same lock as every insert.
    closed: bool,
}

#[derive(Default)]
pub struct CorrelationStore {
    state: Mutex<StoreState>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pending approval and arm its deadline timer.
    pub fn register(
        self: &Arc<Self>,
        handle: MessageHandle,
        conversation: ConversationId,
        action_kind: impl Into<String>,
        action_detail: Value,
        timeout: Duration,
    ) -> PendingDecision {
        let (sink, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            let _ = sink.send(Decision::Deny(DenyReason::ShuttingDown));
            return PendingDecision { handle, rx };
        }
        let expires_at = Instant::now() + timeout;
        // The timer cannot observe the entry before the lock is released.
        let timer = spawn_deadline(Arc::downgrade(self), handle.clone(), expires_at);

        let entry = PendingApproval {
            conversation,
            action_kind: action_kind.into(),
            action_detail,
            expires_at,
            sink,
            timer,
        };

        let displaced = state.pending.insert(handle.clone(), entry);
        drop(state);
        if let Some(previous) = displaced {
            tracing::warn!(
                target = "relay_bridge::correlation",
                handle = %handle,
                "handle reused by channel; denying the earlier approval"
            );
            previous.timer.abort();
            previous.complete(&handle, Decision::Deny(DenyReason::Rejected));
        }

        PendingDecision { handle, rx }
    }

    /// Resolve from a correlated reply. Returns `false` when the handle is not
    /// (or no longer) pending, in which case the message is ordinary input.
    pub fn resolve_by_handle(&self, handle: &MessageHandle, raw_reply: &str) -> bool {
        let Some(entry) = self.take(handle) else {
            return false;
        };
        entry.timer.abort();

        // Deadline already passed but the timer task has not been polled yet.
        if Instant::now() >= entry.expires_at {
            entry.complete(handle, Decision::Deny(DenyReason::TimedOut));
            return false;
        }

        entry.complete(handle, Decision::from_reply(raw_reply));
        true
    }

    /// Called by the deadline timer.
    fn expire(&self, handle: &MessageHandle) -> bool {
        let entry = {
            let mut state = self.state.lock();
            match state.pending.get(handle) {
                Some(entry) if Instant::now() >= entry.expires_at => state.pending.remove(handle),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                tracing::info!(
                    target = "relay_bridge::correlation",
                    handle = %handle,
                    conversation = %entry.conversation,
                    "approval timed out"
                );
                entry.complete(handle, Decision::Deny(DenyReason::TimedOut));
                true
            }
            None => false,
        }
    }

    /// Deny every outstanding approval and cancel its timer. Returns how many
    /// entries were drained. Later registrations are denied immediately.
    pub fn drain(&self) -> usize {
        let drained: Vec<(MessageHandle, PendingApproval)> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().collect()
        };
        let count = drained.len();
        for (handle, entry) in drained {
            entry.timer.abort();
            entry.complete(&handle, Decision::Deny(DenyReason::ShuttingDown));
        }
        if count > 0 {
            tracing::info!(target = "relay_bridge::correlation", count, "drained pending approvals");
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn contains(&self, handle: &MessageHandle) -> bool {
        self.state.lock().pending.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Action kinds currently awaiting a reply in one conversation.
    pub fn pending_kinds(&self, conversation: &ConversationId) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .state
            .lock()
            .pending
            .values()
            .filter(|entry| &entry.conversation == conversation)
            .map(|entry| entry.action_kind.clone())
            .collect();
        kinds.sort();
        kinds
    }

    fn take(&self, handle: &MessageHandle) -> Option<PendingApproval> {
        self.state.lock().pending.remove(handle)
    }
}

fn spawn_deadline(
    store: Weak<CorrelationStore>,
    handle: MessageHandle,
    expires_at: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(expires_at).await;
        if let Some(store) = store.upgrade() {
            store.expire(&handle);
        }
    })
}
