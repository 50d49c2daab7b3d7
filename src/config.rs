use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::types::ConversationId;

#[derive(Debug, Parser, Clone)]
#[command(name = "agent-relay-bridge")]
#[command(about = "Runs coding-agent tasks from a chat and relays their permission prompts")]
pub struct Config {
    /// Directory new tasks run in (defaults to the current directory).
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 120_000)]
    pub approval_timeout_ms: u64,

    /// Comma-separated conversation ids to serve; empty serves all.
    #[arg(long, default_value = "")]
    pub conversations: String,

    /// Also act on messages not sent from the bridge's own account.
    #[arg(long, default_value_t = false)]
    pub accept_others: bool,

    #[arg(long, default_value_t = 4000)]
    pub max_message_len: usize,

    /// Forward intermediate assistant text, not just the final result.
    #[arg(long, default_value_t = false)]
    pub stream_progress: bool,

    /// Serve GET /health and /status on this port.
    #[arg(long)]
    pub api_port: Option<u16>,

    #[arg(long, default_value_t = 5_000)]
    pub shutdown_grace_ms: u64,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value_t = false)]
    pub json_output: bool,

    /// Engine adapter command speaking the JSON-lines task protocol.
    #[arg(required = true)]
    pub command: String,

    #[arg(last = true)]
    pub args: Vec<String>,
}

impl Config {
    pub fn conversations_vec(&self) -> Vec<ConversationId> {
        self.conversations
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ConversationId::new)
            .collect()
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn resolve_working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
