use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::ConversationId;

/// Continuation tokens handed back by the engine, one per conversation.
/// Held in memory only; a restart starts every conversation fresh.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    tokens: Mutex<HashMap<ConversationId, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation: &ConversationId) -> Option<String> {
        self.tokens.lock().get(conversation).cloned()
    }

    pub fn set(&self, conversation: &ConversationId, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        self.tokens.lock().insert(conversation.clone(), token);
    }

    /// Drop the token so the next task starts without prior context.
    pub fn clear(&self, conversation: &ConversationId) -> bool {
        self.tokens.lock().remove(conversation).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}
