use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one chat/conversation on the messaging side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque id the messaging channel assigns to a sent message. Replies that
/// quote a prompt carry it back, which makes it the correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(String);

impl MessageHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("msg-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<MessageHandle>,
    #[serde(default)]
    pub from_me: bool,
    /// Channel-assigned id of this inbound message, when the transport exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Rejected,
    TimedOut,
    ShuttingDown,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::Rejected => "denied by user",
            DenyReason::TimedOut => "timed out",
            DenyReason::ShuttingDown => "shutting down",
        };
        f.write_str(text)
    }
}

/// What a human (or the store on their behalf) decided for one pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    AllowAndTrust,
    Deny(DenyReason),
}

impl Decision {
    /// Classify the raw text of a correlated reply.
    pub fn from_reply(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "yes" | "y" | "approve" => Decision::Allow,
            "always" | "a" => Decision::AllowAndTrust,
            _ => Decision::Deny(DenyReason::Rejected),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::AllowAndTrust => "allow_and_trust",
            Decision::Deny(_) => "deny",
        }
    }
}

/// The answer handed back to the engine's sensitive-action gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny { reason: String },
}

impl Verdict {
    pub fn deny(reason: impl Into<String>) -> Self {
        Verdict::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub active_tasks: usize,
    pub pending_approvals: usize,
    pub working_directory: String,
}

#[cfg(test)]
mod tests {
    use super::{Decision, DenyReason, Verdict};

    #[test]
    fn reply_classification_is_case_insensitive_and_trimmed() {
        for raw in ["YES", "yes", " y ", "Approve"] {
            assert_eq!(Decision::from_reply(raw), Decision::Allow, "{raw:?}");
        }
        for raw in ["Always", "a", " ALWAYS\n"] {
            assert_eq!(Decision::from_reply(raw), Decision::AllowAndTrust, "{raw:?}");
        }
        for raw in ["no", "nope", "", "yes please", "n"] {
            assert_eq!(
                Decision::from_reply(raw),
                Decision::Deny(DenyReason::Rejected),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn deny_reasons_render_human_text() {
        assert_eq!(DenyReason::TimedOut.to_string(), "timed out");
        assert_eq!(DenyReason::ShuttingDown.to_string(), "shutting down");
    }

    #[test]
    fn verdict_serializes_with_behavior_tag() {
        let json = serde_json::to_value(Verdict::deny("timed out")).unwrap();
        assert_eq!(json["behavior"], "deny");
        assert_eq!(json["reason"], "timed out");
        assert!(Verdict::Allow.is_allow());
    }
}
