use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

use crate::config::Config;

/// Logs go to stderr: stdout carries the messaging transport.
pub fn init_logging(cfg: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Machine-readable lifecycle events (`--json-output`), one JSON object per
/// line: `{"ts": ..., "type": ..., "payload": ...}`.
#[derive(Clone, Default)]
pub struct EventEmitter {
    sink: Option<Sink>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EventEmitter {
    /// Emit to stderr when `json_output` is set.
    pub fn new(json_output: bool) -> Self {
        if json_output {
            Self::to_writer(io::stderr())
        } else {
            Self::disabled()
        }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn emit<T: Serialize>(&self, event_type: &str, payload: T) {
        let Some(sink) = &self.sink else {
            return;
        };

        let line = json!({
            "ts": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "type": event_type,
            "payload": payload,
        });

        let mut sink = sink.lock();
        if let Err(error) = writeln!(sink, "{line}").and_then(|_| sink.flush()) {
            tracing::debug!(target = "relay_bridge::events", error = %error, "dropping event");
        }
    }
}
