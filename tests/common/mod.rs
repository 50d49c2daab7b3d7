#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use relay_bridge::{
    channel::{MemoryChannel, SentMessage},
    controller::{Controller, ControllerSettings},
    engine::{receiver_stream, EngineEvent, EngineStream, TaskEngine, TaskOutcome, TaskRequest},
    error::Result,
    types::{ConversationId, InboundMessage, MessageHandle, Verdict},
};
use serde_json::json;
use tokio::sync::mpsc;

/// Asks the gate for each listed action kind in turn, then reports the
/// verdicts as its result text. With `hold` set it waits for cancellation
/// before reporting.
pub struct GatedEngine {
    pub kinds: Vec<&'static str>,
    pub hold: bool,
}

impl GatedEngine {
    pub fn new(kinds: &[&'static str]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            hold: false,
        }
    }

    pub fn holding(kinds: &[&'static str]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            hold: true,
        }
    }
}

#[async_trait]
impl TaskEngine for GatedEngine {
    async fn start(&self, request: TaskRequest) -> Result<EngineStream> {
        let (tx, rx) = mpsc::channel(16);
        let kinds = self.kinds.clone();
        let hold = self.hold;
        tokio::spawn(async move {
            let _ = tx
                .send(EngineEvent::Session {
                    continuation_token: format!("sess-{}", request.gate.conversation()),
                })
                .await;

            let mut verdicts = Vec::new();
            for kind in kinds {
                let verdict = request
                    .gate
                    .request(kind, json!({"path": "src/auth.js", "command": "npm test"}))
                    .await;
                verdicts.push(match verdict {
                    Verdict::Allow => format!("{kind}: allow"),
                    Verdict::Deny { reason } => format!("{kind}: deny ({reason})"),
                });
            }

            if hold {
                request.cancel.cancelled().await;
                return;
            }

            let _ = tx
                .send(EngineEvent::Result(TaskOutcome {
                    success: true,
                    text: verdicts.join(", "),
                    cost_usd: Some(0.002),
                    turns: Some(1),
                    continuation_token: None,
                }))
                .await;
        });
        Ok(receiver_stream(rx))
    }
}

/// Routes each conversation to its own engine behaviour.
pub struct PerConversation {
    pub engines: Vec<(ConversationId, Arc<dyn TaskEngine>)>,
}

#[async_trait]
impl TaskEngine for PerConversation {
    async fn start(&self, request: TaskRequest) -> Result<EngineStream> {
        let conversation = request.gate.conversation().clone();
        let engine = self
            .engines
            .iter()
            .find(|(id, _)| *id == conversation)
            .map(|(_, engine)| engine.clone())
            .expect("engine configured for conversation");
        engine.start(request).await
    }
}

pub struct Harness {
    pub controller: Arc<Controller>,
    pub sent: mpsc::UnboundedReceiver<SentMessage>,
}

impl Harness {
    pub fn new(engine: Arc<dyn TaskEngine>) -> Self {
        Self::with_timeout(engine, Duration::from_millis(120_000))
    }

    pub fn with_timeout(engine: Arc<dyn TaskEngine>, approval_timeout: Duration) -> Self {
        let (channel, sent) = MemoryChannel::new();
        let mut settings = ControllerSettings::new("/work/repo");
        settings.approval_timeout = approval_timeout;
        Self {
            controller: Controller::build(engine, Arc::new(channel), settings),
            sent,
        }
    }

    pub async fn next(&mut self) -> SentMessage {
        tokio::time::timeout(Duration::from_secs(600), self.sent.recv())
            .await
            .expect("timed out waiting for an outbound message")
            .expect("channel closed")
    }
}

pub fn text(conversation: &str, text: &str) -> InboundMessage {
    InboundMessage {
        conversation_id: ConversationId::new(conversation),
        text: text.to_string(),
        reply_to: None,
        from_me: true,
        message_id: None,
    }
}

pub fn reply(conversation: &str, handle: &MessageHandle, text: &str) -> InboundMessage {
    InboundMessage {
        reply_to: Some(handle.clone()),
        ..self::text(conversation, text)
    }
}
