//! One task from claim to release: slot bookkeeping, the engine event loop and
//! forwarding results into the conversation.

use std::{path::Path, sync::Arc, time::Instant};

use futures_lite::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::PermissionBridge,
    channel::MessageChannel,
    engine::{EngineEvent, EngineStream, TaskEngine, TaskOutcome, TaskRequest},
    error::{BridgeError, Result},
    events::EventEmitter,
    format::{
        format_failure, format_outcome, format_started, split_message, ALREADY_RUNNING_MESSAGE,
        STOPPED_MESSAGE,
    },
    sessions::SessionRegistry,
    tasks::{StartRefused, TaskId, TaskRegistry},
    types::ConversationId,
};

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4_000;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEnd {
    Completed(TaskOutcome),
    /// Engine reported failure, failed to start, or its stream ended early.
    Failed(String),
    Stopped,
}

impl TaskEnd {
    pub fn label(&self) -> &'static str {
        match self {
            TaskEnd::Completed(_) => "completed",
            TaskEnd::Failed(_) => "failed",
            TaskEnd::Stopped => "stopped",
        }
    }
}

/// Releases the slot on every exit path, unwinding included.
struct SlotGuard<'a> {
    tasks: &'a TaskRegistry,
    conversation: &'a ConversationId,
    task: TaskId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.tasks.finish(self.conversation, self.task);
    }
}

pub struct TaskRunner {
    engine: Arc<dyn TaskEngine>,
    channel: Arc<dyn MessageChannel>,
    bridge: Arc<PermissionBridge>,
    tasks: Arc<TaskRegistry>,
    sessions: Arc<SessionRegistry>,
    events: EventEmitter,
    max_message_len: usize,
    stream_progress: bool,
}

impl TaskRunner {
    pub fn new(
        engine: Arc<dyn TaskEngine>,
        channel: Arc<dyn MessageChannel>,
        bridge: Arc<PermissionBridge>,
        tasks: Arc<TaskRegistry>,
        sessions: Arc<SessionRegistry>,
        events: EventEmitter,
    ) -> Self {
        Self {
            engine,
            channel,
            bridge,
            tasks,
            sessions,
            events,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            stream_progress: false,
        }
    }

    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    pub fn with_stream_progress(mut self, stream_progress: bool) -> Self {
        self.stream_progress = stream_progress;
        self
    }

    pub async fn execute_task(
        &self,
        conversation: &ConversationId,
        prompt: &str,
        working_directory: &Path,
    ) -> Result<TaskEnd> {
        let cancel = CancellationToken::new();
        let task = match self.tasks.start(conversation, cancel.clone()) {
            Ok(task) => task,
            Err(StartRefused::Busy) => {
                tracing::info!(
                    target = "relay_bridge::runner",
                    conversation = %conversation,
                    "rejecting task, one is already running"
                );
                self.deliver(conversation, ALREADY_RUNNING_MESSAGE).await;
                return Err(BridgeError::AlreadyRunning(conversation.clone()));
            }
            Err(StartRefused::Closed) => {
                tracing::info!(
                    target = "relay_bridge::runner",
                    conversation = %conversation,
                    "dropping task, shutting down"
                );
                return Err(BridgeError::ShuttingDown);
            }
        };
        let slot = SlotGuard {
            tasks: &self.tasks,
            conversation,
            task,
        };
        let started = Instant::now();
        let wd = working_directory.display().to_string();

        tracing::info!(
            target = "relay_bridge::runner",
            conversation = %conversation,
            task = %task,
            working_directory = %wd,
            "task started"
        );
        self.events.emit(
            "task_started",
            json!({
                "conversation": conversation,
                "task": task.to_string(),
                "working_directory": wd,
            }),
        );
        self.deliver(conversation, &format_started(&wd)).await;

        let request = TaskRequest {
            prompt: prompt.to_string(),
            working_directory: working_directory.to_path_buf(),
            continuation_token: self.sessions.get(conversation),
            gate: self.bridge.gate(conversation.clone()).bound_to(cancel.clone()),
            cancel: cancel.clone(),
        };

        let end = match self.engine.start(request).await {
            Ok(stream) => self.consume(conversation, stream, &cancel).await,
            Err(error) => {
                tracing::warn!(
                    target = "relay_bridge::runner",
                    conversation = %conversation,
                    error = %error,
                    "engine failed to start"
                );
                TaskEnd::Failed(error.to_string())
            }
        };

        // Free the conversation before reporting so a follow-up prompt sent in
        // reaction to the result is accepted.
        drop(slot);

        match &end {
            TaskEnd::Completed(outcome) => self.deliver(conversation, &format_outcome(outcome)).await,
            TaskEnd::Failed(message) => self.deliver(conversation, &format_failure(message)).await,
            TaskEnd::Stopped => self.deliver(conversation, STOPPED_MESSAGE).await,
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            target = "relay_bridge::runner",
            conversation = %conversation,
            task = %task,
            end = end.label(),
            duration_ms,
            "task finished"
        );
        self.events.emit(
            "task_finished",
            json!({
                "conversation": conversation,
                "task": task.to_string(),
                "end": end.label(),
                "duration_ms": duration_ms,
            }),
        );
        Ok(end)
    }

    async fn consume(
        &self,
        conversation: &ConversationId,
        mut stream: EngineStream,
        cancel: &CancellationToken,
    ) -> TaskEnd {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return TaskEnd::Stopped,
                event = stream.next() => match event {
                    Some(EngineEvent::Session { continuation_token }) => {
                        self.sessions.set(conversation, continuation_token);
                    }
                    Some(EngineEvent::Assistant { text }) => {
                        if self.stream_progress && !text.trim().is_empty() {
                            self.deliver(conversation, &text).await;
                        }
                    }
                    Some(EngineEvent::Result(outcome)) => {
                        if let Some(token) = &outcome.continuation_token {
                            self.sessions.set(conversation, token.clone());
                        }
                        return if outcome.success {
                            TaskEnd::Completed(outcome)
                        } else {
                            TaskEnd::Failed(outcome.text)
                        };
                    }
                    None => {
                        // A stream that ends right after a cancel is a stop, not a failure.
                        if cancel.is_cancelled() {
                            return TaskEnd::Stopped;
                        }
                        return TaskEnd::Failed("engine stream ended without a result".into());
                    }
                },
            }
        }
    }

    async fn deliver(&self, conversation: &ConversationId, text: &str) {
        for chunk in split_message(text, self.max_message_len) {
            if let Err(error) = self.channel.send(conversation, &chunk).await {
                tracing::warn!(
                    target = "relay_bridge::runner",
                    conversation = %conversation,
                    error = %error,
                    "failed to deliver message"
                );
                return;
            }
        }
    }
}
