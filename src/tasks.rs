//! Single in-flight task slot per conversation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::ConversationId;

/// Identifies one task attempt. `finish` only clears the slot it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
struct TaskSlot {
    id: TaskId,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Why `start` did not hand out a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRefused {
    /// The conversation already has an active task.
    Busy,
    /// `cancel_all` ran; no task may start anymore.
    Closed,
}

#[derive(Debug, Default)]
struct SlotTable {
    slots: HashMap<ConversationId, TaskSlot>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    table: Mutex<SlotTable>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the conversation's slot. Registers nothing when a task is
    /// already active there or the registry has been closed.
    pub fn start(
        &self,
        conversation: &ConversationId,
        cancel: CancellationToken,
    ) -> Result<TaskId, StartRefused> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(StartRefused::Closed);
        }
        if table.slots.contains_key(conversation) {
            return Err(StartRefused::Busy);
        }
        let id = TaskId::new();
        table.slots.insert(
            conversation.clone(),
            TaskSlot {
                id,
                cancel,
                started_at: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Release the slot if it still belongs to `task`.
    pub fn finish(&self, conversation: &ConversationId, task: TaskId) -> bool {
        let mut table = self.table.lock();
        match table.slots.get(conversation) {
            Some(slot) if slot.id == task => {
                table.slots.remove(conversation);
                true
            }
            _ => false,
        }
    }

    /// Fire the cancel token of the active task. The slot itself is released
    /// by the task when it reaches its terminal state.
    pub fn cancel(&self, conversation: &ConversationId) -> bool {
        match self.table.lock().slots.get(conversation) {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Close the registry, then cancel every active task and empty it. Tasks
    /// dispatched but not yet started are refused from here on.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(ConversationId, TaskSlot)> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.slots.drain().collect()
        };
        for (conversation, slot) in &drained {
            tracing::debug!(
                target = "relay_bridge::tasks",
                conversation = %conversation,
                task = %slot.id,
                "cancelling task for shutdown"
            );
            slot.cancel.cancel();
        }
        drained.len()
    }

    pub fn is_active(&self, conversation: &ConversationId) -> bool {
        self.table.lock().slots.contains_key(conversation)
    }

    /// When the conversation's active task claimed its slot.
    pub fn started_at(&self, conversation: &ConversationId) -> Option<DateTime<Utc>> {
        self.table
            .lock()
            .slots
            .get(conversation)
            .map(|slot| slot.started_at)
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    pub fn len(&self) -> usize {
        self.table.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use tokio_util::sync::CancellationToken;

    use super::{StartRefused, TaskRegistry};
    use crate::types::ConversationId;

    #[test]
    fn second_start_is_rejected() {
        let registry = TaskRegistry::new();
        let conv = ConversationId::new("c1");
        let first = registry.start(&conv, CancellationToken::new());
        assert!(first.is_ok());
        assert_eq!(
            registry.start(&conv, CancellationToken::new()),
            Err(StartRefused::Busy)
        );
        assert!(registry
            .start(&ConversationId::new("c2"), CancellationToken::new())
            .is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn stale_finish_does_not_clear_a_newer_task() {
        let registry = TaskRegistry::new();
        let conv = ConversationId::new("c1");
        let old = registry.start(&conv, CancellationToken::new()).unwrap();
        assert!(registry.finish(&conv, old));

        let new = registry.start(&conv, CancellationToken::new()).unwrap();
        assert!(!registry.finish(&conv, old));
        assert!(registry.is_active(&conv));
        assert!(registry.finish(&conv, new));
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_fires_token_but_keeps_slot() {
        let registry = TaskRegistry::new();
        let conv = ConversationId::new("c1");
        let token = CancellationToken::new();
        registry.start(&conv, token.clone()).unwrap();

        assert!(registry.cancel(&conv));
        assert!(token.is_cancelled());
        assert!(registry.is_active(&conv));
        assert!(!registry.cancel(&ConversationId::new("missing")));
    }

    #[test]
    fn cancel_all_empties_registry() {
        let registry = TaskRegistry::new();
        let tokens: Vec<CancellationToken> = (0..3).map(|_| CancellationToken::new()).collect();
        for (i, token) in tokens.iter().enumerate() {
            registry
                .start(&ConversationId::new(format!("c{i}")), token.clone())
                .unwrap();
        }
        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[test]
    fn start_after_cancel_all_is_refused() {
        let registry = TaskRegistry::new();
        assert!(!registry.is_closed());
        assert_eq!(registry.cancel_all(), 0);
        assert!(registry.is_closed());

        let conv = ConversationId::new("late");
        assert_eq!(
            registry.start(&conv, CancellationToken::new()),
            Err(StartRefused::Closed)
        );
        assert!(!registry.is_active(&conv));
        assert!(registry.is_empty());
    }

    #[test]
    fn started_at_tracks_the_active_task() {
        let registry = TaskRegistry::new();
        let conv = ConversationId::new("c1");
        assert!(registry.started_at(&conv).is_none());

        let before = chrono::Utc::now();
        let task = registry.start(&conv, CancellationToken::new()).unwrap();
        let at = registry.started_at(&conv).unwrap();
        assert!(at >= before && at <= chrono::Utc::now());

        registry.finish(&conv, task);
        assert!(registry.started_at(&conv).is_none());
    }

    #[test]
    fn concurrent_starts_admit_exactly_one() {
        let registry = Arc::new(TaskRegistry::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry
                        .start(&ConversationId::new("shared"), CancellationToken::new())
                        .is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }
}
