//! JSON-lines frames exchanged with an engine adapter process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    engine::EngineEvent,
    engine::TaskOutcome,
    error::{BridgeError, Result},
    types::Verdict,
};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateBehavior {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BridgeToEngine {
    StartTask {
        protocol_version: u32,
        prompt: String,
        working_directory: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continuation_token: Option<String>,
    },
    ApprovalResponse {
        request_id: String,
        behavior: GateBehavior,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Cancel {},
}

impl BridgeToEngine {
    pub fn approval_response(request_id: impl Into<String>, verdict: &Verdict) -> Self {
        let (behavior, message) = match verdict {
            Verdict::Allow => (GateBehavior::Allow, None),
            Verdict::Deny { reason } => (GateBehavior::Deny, Some(reason.clone())),
        };
        BridgeToEngine::ApprovalResponse {
            request_id: request_id.into(),
            behavior,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineToBridge {
    Session {
        continuation_token: String,
    },
    Assistant {
        text: String,
    },
    ApprovalRequest {
        request_id: String,
        action_kind: String,
        #[serde(default)]
        detail: Value,
    },
    Result {
        success: bool,
        #[serde(default)]
        text: String,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        turns: Option<u32>,
        #[serde(default)]
        continuation_token: Option<String>,
    },
    Error {
        message: String,
    },
}

impl EngineToBridge {
    /// Parse one line written by the adapter.
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|error| BridgeError::Protocol(format!("invalid engine frame: {error}")))
    }

    /// Map a frame to the event the runner consumes. Approval requests are
    /// handled by the engine adapter itself and map to `None`.
    pub fn into_event(self) -> Option<EngineEvent> {
        match self {
            EngineToBridge::Session { continuation_token } => {
                Some(EngineEvent::Session { continuation_token })
            }
            EngineToBridge::Assistant { text } => Some(EngineEvent::Assistant { text }),
            EngineToBridge::Result {
                success,
                text,
                cost_usd,
                turns,
                continuation_token,
            } => Some(EngineEvent::Result(TaskOutcome {
                success,
                text,
                cost_usd,
                turns,
                continuation_token,
            })),
            EngineToBridge::Error { message } => {
                Some(EngineEvent::Result(TaskOutcome::failure(message)))
            }
            EngineToBridge::ApprovalRequest { .. } => None,
        }
    }
}
