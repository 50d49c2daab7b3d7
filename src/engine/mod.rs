//! Task engine boundary: the coding agent is an opaque worker that streams
//! events and calls back into an [`ApprovalGate`] before sensitive actions.

use std::{path::PathBuf, pin::Pin};

use async_trait::async_trait;
use futures_lite::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{bridge::ApprovalGate, error::Result};

pub mod process;

pub type EngineStream = Pin<Box<dyn Stream<Item = EngineEvent> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine established (or resumed) its own session.
    Session { continuation_token: String },
    /// Intermediate assistant text.
    Assistant { text: String },
    /// Terminal event; nothing follows it.
    Result(TaskOutcome),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskOutcome {
    pub success: bool,
    pub text: String,
    pub cost_usd: Option<f64>,
    pub turns: Option<u32>,
    pub continuation_token: Option<String>,
}

impl TaskOutcome {
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
            ..Self::default()
        }
    }
}

pub struct TaskRequest {
    pub prompt: String,
    pub working_directory: PathBuf,
    pub continuation_token: Option<String>,
    pub gate: ApprovalGate,
    /// Fired on /stop or shutdown; the stream must end promptly after it.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait TaskEngine: Send + Sync {
    async fn start(&self, request: TaskRequest) -> Result<EngineStream>;
}

/// Adapt an mpsc receiver into an [`EngineStream`].
pub fn receiver_stream(rx: mpsc::Receiver<EngineEvent>) -> EngineStream {
    Box::pin(futures_lite::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    }))
}
