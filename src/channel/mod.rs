//! Messaging channel boundary.
//!
//! The bridge only needs to send text into a conversation and learn the
//! handle the transport assigned to it; inbound traffic is fed to the
//! controller by whichever transport is running.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    echo::EchoFilter,
    error::{BridgeError, Result},
    types::{ConversationId, MessageHandle},
};

pub mod stdio;

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Deliver `text` and return the handle replies will quote.
    async fn send(&self, conversation: &ConversationId, text: &str) -> Result<MessageHandle>;
}

#[async_trait]
impl<T: MessageChannel + ?Sized> MessageChannel for Arc<T> {
    async fn send(&self, conversation: &ConversationId, text: &str) -> Result<MessageHandle> {
        (**self).send(conversation, text).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub conversation_id: ConversationId,
    pub text: String,
    pub handle: MessageHandle,
}

/// In-process channel: every sent message is handed to a receiver.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<SentMessage>,
    offline: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SentMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                offline: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Make subsequent sends fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send(&self, conversation: &ConversationId, text: &str) -> Result<MessageHandle> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::transport("memory channel is offline"));
        }
        let handle = MessageHandle::generate();
        self.tx
            .send(SentMessage {
                conversation_id: conversation.clone(),
                text: text.to_string(),
                handle: handle.clone(),
            })
            .map_err(|_| BridgeError::transport("memory channel receiver dropped"))?;
        Ok(handle)
    }
}

/// Records every handle the wrapped channel hands out so the router can
/// recognise the transport echoing our own messages back.
pub struct RecordingChannel<C> {
    inner: C,
    echoes: Arc<EchoFilter>,
}

impl<C> RecordingChannel<C> {
    pub fn new(inner: C, echoes: Arc<EchoFilter>) -> Self {
        Self { inner, echoes }
    }
}

#[async_trait]
impl<C: MessageChannel> MessageChannel for RecordingChannel<C> {
    async fn send(&self, conversation: &ConversationId, text: &str) -> Result<MessageHandle> {
        let handle = self.inner.send(conversation, text).await?;
        self.echoes.record(&handle, Instant::now());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Instant};

    use super::{MemoryChannel, MessageChannel, RecordingChannel};
    use crate::{echo::EchoFilter, error::BridgeError, types::ConversationId};

    #[tokio::test]
    async fn memory_channel_delivers_with_unique_handles() {
        let (channel, mut rx) = MemoryChannel::new();
        let conv = ConversationId::new("c1");
        let h1 = channel.send(&conv, "one").await.unwrap();
        let h2 = channel.send(&conv, "two").await.unwrap();
        assert_ne!(h1, h2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.text, "one");
        assert_eq!(first.handle, h1);
    }

    #[tokio::test]
    async fn offline_memory_channel_fails_with_transport_error() {
        let (channel, _rx) = MemoryChannel::new();
        channel.set_offline(true);
        let err = channel
            .send(&ConversationId::new("c1"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[tokio::test]
    async fn recording_channel_remembers_sent_handles() {
        let (inner, _rx) = MemoryChannel::new();
        let echoes = Arc::new(EchoFilter::default());
        let channel = RecordingChannel::new(inner, Arc::clone(&echoes));
        let handle = channel.send(&ConversationId::new("c1"), "hi").await.unwrap();
        assert!(echoes.is_echo(&handle, Instant::now()));
    }
}
