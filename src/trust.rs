use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::types::ConversationId;

/// Per-conversation action kinds that no longer need a round-trip.
#[derive(Debug, Default)]
pub struct TrustCache {
    trusted: Mutex<HashMap<ConversationId, HashSet<String>>>,
}

impl TrustCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trusted(&self, conversation: &ConversationId, action_kind: &str) -> bool {
        self.trusted
            .lock()
            .get(conversation)
            .is_some_and(|kinds| kinds.contains(action_kind))
    }

    /// Returns `true` when the kind was not trusted before.
    pub fn trust(&self, conversation: &ConversationId, action_kind: &str) -> bool {
        self.trusted
            .lock()
            .entry(conversation.clone())
            .or_default()
            .insert(action_kind.to_string())
    }

    /// Forget every trusted kind for the conversation.
    pub fn reset(&self, conversation: &ConversationId) -> usize {
        self.trusted
            .lock()
            .remove(conversation)
            .map(|kinds| kinds.len())
            .unwrap_or(0)
    }

    pub fn trusted_kinds(&self, conversation: &ConversationId) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .trusted
            .lock()
            .get(conversation)
            .map(|kinds| kinds.iter().cloned().collect())
            .unwrap_or_default();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::TrustCache;
    use crate::types::ConversationId;

    #[test]
    fn trust_is_idempotent() {
        let cache = TrustCache::new();
        let conv = ConversationId::new("a");
        assert!(cache.trust(&conv, "file-edit"));
        assert!(!cache.trust(&conv, "file-edit"));
        assert!(cache.is_trusted(&conv, "file-edit"));
        assert!(!cache.is_trusted(&conv, "shell-exec"));
    }

    #[test]
    fn trust_is_scoped_per_conversation() {
        let cache = TrustCache::new();
        let a = ConversationId::new("a");
        let b = ConversationId::new("b");
        cache.trust(&a, "file-edit");
        assert!(cache.is_trusted(&a, "file-edit"));
        assert!(!cache.is_trusted(&b, "file-edit"));
    }

    #[test]
    fn reset_clears_only_that_conversation() {
        let cache = TrustCache::new();
        let a = ConversationId::new("a");
        let b = ConversationId::new("b");
        cache.trust(&a, "file-edit");
        cache.trust(&a, "shell-exec");
        cache.trust(&b, "file-edit");

        assert_eq!(cache.reset(&a), 2);
        assert!(cache.trusted_kinds(&a).is_empty());
        assert_eq!(cache.trusted_kinds(&b), vec!["file-edit".to_string()]);
        assert_eq!(cache.reset(&a), 0);
    }
}
