//! Inbound dispatch and process-wide state.
//!
//! The controller owns every registry and hands out `Arc`s to the pieces
//! that need them. Tasks run on a [`TaskTracker`] so shutdown can wait for
//! them after cancelling.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::{
    bridge::PermissionBridge,
    channel::{MessageChannel, RecordingChannel},
    config::Config,
    correlation::{CorrelationStore, DEFAULT_APPROVAL_TIMEOUT},
    echo::EchoFilter,
    engine::TaskEngine,
    events::EventEmitter,
    format::{format_failure, format_status, HELP_MESSAGE},
    routing::{route, route_text, Command, IgnoreReason, Route, RoutePolicy},
    runner::{TaskRunner, DEFAULT_MAX_MESSAGE_LEN},
    sessions::SessionRegistry,
    tasks::TaskRegistry,
    trust::TrustCache,
    types::{ConversationId, InboundMessage, StatusSnapshot},
};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub working_dir: PathBuf,
    pub approval_timeout: Duration,
    pub policy: RoutePolicy,
    pub max_message_len: usize,
    pub stream_progress: bool,
    pub events: EventEmitter,
}

impl ControllerSettings {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            policy: RoutePolicy::default(),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            stream_progress: false,
            events: EventEmitter::disabled(),
        }
    }

    pub fn from_config(cfg: &Config, events: EventEmitter) -> Self {
        Self {
            working_dir: cfg.resolve_working_dir(),
            approval_timeout: cfg.approval_timeout(),
            policy: RoutePolicy::new(cfg.conversations_vec(), cfg.accept_others),
            max_message_len: cfg.max_message_len,
            stream_progress: cfg.stream_progress,
            events,
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Ignored(IgnoreReason),
    ReplyResolved,
    TaskSpawned,
    CommandHandled(Command),
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub cancelled_tasks: usize,
    pub denied_approvals: usize,
    /// Task futures still running when the grace period ran out.
    pub timed_out: bool,
}

pub struct Controller {
    channel: Arc<dyn MessageChannel>,
    bridge: Arc<PermissionBridge>,
    runner: Arc<TaskRunner>,
    tasks: Arc<TaskRegistry>,
    sessions: Arc<SessionRegistry>,
    echoes: Arc<EchoFilter>,
    policy: RoutePolicy,
    working_dir: RwLock<PathBuf>,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

impl Controller {
    pub fn build(
        engine: Arc<dyn TaskEngine>,
        channel: Arc<dyn MessageChannel>,
        settings: ControllerSettings,
    ) -> Arc<Self> {
        let echoes = Arc::new(EchoFilter::default());
        let channel: Arc<dyn MessageChannel> =
            Arc::new(RecordingChannel::new(channel, echoes.clone()));

        let bridge = Arc::new(PermissionBridge::new(
            channel.clone(),
            Arc::new(CorrelationStore::new()),
            Arc::new(TrustCache::new()),
            settings.approval_timeout,
            settings.events.clone(),
        ));
        let tasks = Arc::new(TaskRegistry::new());
        let sessions = Arc::new(SessionRegistry::new());
        let runner = TaskRunner::new(
            engine,
            channel.clone(),
            bridge.clone(),
            tasks.clone(),
            sessions.clone(),
            settings.events,
        )
        .with_max_message_len(settings.max_message_len)
        .with_stream_progress(settings.stream_progress);

        Arc::new(Self {
            channel,
            bridge,
            runner: Arc::new(runner),
            tasks,
            sessions,
            echoes,
            policy: settings.policy,
            working_dir: RwLock::new(settings.working_dir),
            tracker: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Handle `msg` on its own tracked task so a long command never holds up
    /// the inbound loop.
    pub fn dispatch(self: &Arc<Self>, msg: InboundMessage) {
        let controller = Arc::clone(self);
        self.tracker.spawn(async move {
            controller.handle_inbound(msg).await;
        });
    }

    pub async fn handle_inbound(self: &Arc<Self>, msg: InboundMessage) -> Dispatch {
        let conversation = msg.conversation_id.clone();
        let routed = match route(&msg, &self.policy, &self.echoes, Instant::now()) {
            Route::Reply { handle, text } => {
                if self.bridge.on_reply_received(&handle, &text) {
                    return Dispatch::ReplyResolved;
                }
                tracing::debug!(
                    target = "relay_bridge::controller",
                    conversation = %conversation,
                    handle = %handle,
                    "reply does not match a pending approval, treating as input"
                );
                route_text(&text)
            }
            other => other,
        };

        match routed {
            Route::Ignore(reason) => Dispatch::Ignored(reason),
            // route_text never yields a reply
            Route::Reply { .. } => Dispatch::Ignored(IgnoreReason::Empty),
            Route::Command(command) => {
                self.run_command(&conversation, &command).await;
                Dispatch::CommandHandled(command)
            }
            Route::Prompt(prompt) => self.spawn_task(conversation, prompt),
        }
    }

    fn spawn_task(self: &Arc<Self>, conversation: ConversationId, prompt: String) -> Dispatch {
        if self.is_shutting_down() {
            return Dispatch::ShuttingDown;
        }
        let working_dir = self.working_dir();
        let runner = Arc::clone(&self.runner);
        self.tracker.spawn(async move {
            // The runner has already told the conversation about AlreadyRunning.
            // A task refused during shutdown gets no reply.
            if let Err(error) = runner.execute_task(&conversation, &prompt, &working_dir).await {
                tracing::debug!(
                    target = "relay_bridge::controller",
                    conversation = %conversation,
                    error = %error,
                    "task not started"
                );
            }
        });
        Dispatch::TaskSpawned
    }

    async fn run_command(&self, conversation: &ConversationId, command: &Command) {
        tracing::info!(
            target = "relay_bridge::controller",
            conversation = %conversation,
            command = ?command,
            "command"
        );
        let reply = match command {
            Command::Stop => {
                if self.tasks.cancel(conversation) {
                    // The runner reports the stop once the task unwinds.
                    return;
                }
                "No task is running.".to_string()
            }
            Command::Reset => {
                let had_session = self.sessions.clear(conversation);
                let forgotten = self.bridge.trust().reset(conversation);
                match (had_session, forgotten) {
                    (false, 0) => "🔄 Nothing to reset.".to_string(),
                    (_, 0) => "🔄 Session reset.".to_string(),
                    (_, n) => format!("🔄 Session reset. Forgot {n} trusted action kind(s)."),
                }
            }
            Command::Status => {
                let trusted = self.bridge.trust().trusted_kinds(conversation);
                let pending = self.bridge.pending_kinds(conversation);
                format_status(
                    &self.status(),
                    self.tasks.started_at(conversation),
                    &trusted,
                    &pending,
                )
            }
            Command::Pwd => format!("📂 {}", self.working_dir().display()),
            Command::Cd(target) => match self.change_dir(target).await {
                Ok(dir) => format!("📂 {}", dir.display()),
                Err(message) => format_failure(&message),
            },
            Command::Help => HELP_MESSAGE.to_string(),
            Command::Unknown(name) => {
                format!("Unknown command /{name}. Send /help for the list.")
            }
        };

        if let Err(error) = self.channel.send(conversation, &reply).await {
            tracing::warn!(
                target = "relay_bridge::controller",
                conversation = %conversation,
                error = %error,
                "failed to deliver command reply"
            );
        }
    }

    async fn change_dir(&self, target: &str) -> Result<PathBuf, String> {
        let target = target.trim();
        if target.is_empty() {
            return Err("usage: /cd <path>".to_string());
        }
        let candidate = expand_path(target, &self.working_dir());
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|error| format!("{}: {error}", candidate.display()))?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|error| format!("{}: {error}", resolved.display()))?;
        if !metadata.is_dir() {
            return Err(format!("not a directory: {}", resolved.display()));
        }
        *self.working_dir.write() = resolved.clone();
        tracing::info!(
            target = "relay_bridge::controller",
            working_directory = %resolved.display(),
            "working directory changed"
        );
        Ok(resolved)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            active_tasks: self.tasks.len(),
            pending_approvals: self.bridge.pending_count(),
            working_directory: self.working_dir().display().to_string(),
        }
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir.read().clone()
    }

    pub fn bridge(&self) -> &Arc<PermissionBridge> {
        &self.bridge
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Cancel every task, deny every pending approval, then wait up to `grace`
    /// for the task futures to finish.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);
        let cancelled_tasks = self.tasks.cancel_all();
        let denied_approvals = self.bridge.drain();
        self.tracker.close();

        let timed_out = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_err();
        let report = ShutdownReport {
            cancelled_tasks,
            denied_approvals,
            timed_out,
        };
        if timed_out {
            tracing::warn!(
                target = "relay_bridge::controller",
                remaining = self.tracker.len(),
                "shutdown grace elapsed with tasks still running"
            );
        }
        tracing::info!(
            target = "relay_bridge::controller",
            cancelled_tasks,
            denied_approvals,
            "shutdown complete"
        );
        report
    }
}

/// Resolve `~`, `~/...` and relative paths against `base`.
fn expand_path(target: &str, base: &Path) -> PathBuf {
    let expanded = match target.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(target),
        },
        _ => PathBuf::from(target),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}
