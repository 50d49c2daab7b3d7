//! Error types for the bridge.

use thiserror::Error;

use crate::types::ConversationId;

/// Errors surfaced by the bridge, its transports and its engines.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A second task was requested while one is active for the conversation.
    #[error("a task is already running in {0}")]
    AlreadyRunning(ConversationId),

    /// The messaging channel could not send or receive.
    #[error("transport error: {0}")]
    Transport(String),

    /// The task engine failed to start or broke its protocol.
    #[error("engine error: {0}")]
    Engine(String),

    /// A frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The bridge is draining and accepts no new work.
    #[error("shutting down")]
    ShuttingDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::BridgeError;
    use crate::types::ConversationId;

    #[test]
    fn already_running_names_the_conversation() {
        let err = BridgeError::AlreadyRunning(ConversationId::new("c1"));
        assert_eq!(err.to_string(), "a task is already running in c1");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Io(_)));
        assert_eq!(
            BridgeError::transport("down").to_string(),
            "transport error: down"
        );
    }
}
