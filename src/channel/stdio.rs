//! JSON-lines transport over a reader/writer pair (stdin/stdout in the binary).
//!
//! A front-end process owns the real chat account and speaks this protocol:
//!
//! ```text
//! -> {"type":"message","payload":{"conversation_id":"c1","text":"yes","reply_to":"msg-…","from_me":true}}
//! <- {"type":"send","payload":{"conversation_id":"c1","text":"…","handle":"msg-…"}}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot},
};

use crate::{
    channel::MessageChannel,
    error::{BridgeError, Result},
    types::{ConversationId, InboundMessage, MessageHandle},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(InboundMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundFrame {
    Send {
        conversation_id: ConversationId,
        text: String,
        handle: MessageHandle,
    },
}

type WriteRequest = (OutboundFrame, oneshot::Sender<std::io::Result<()>>);

#[derive(Clone)]
pub struct StdioChannel {
    out_tx: mpsc::Sender<WriteRequest>,
}

impl StdioChannel {
    /// Start the reader and writer tasks. Inbound messages arrive on the
    /// returned receiver, which closes when the reader hits EOF.
    pub fn spawn<R, W>(reader: R, writer: W) -> (Self, mpsc::Receiver<InboundMessage>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel::<WriteRequest>(256);
        let (in_tx, in_rx) = mpsc::channel::<InboundMessage>(256);

        tokio::spawn(run_writer(writer, out_rx));
        tokio::spawn(run_reader(reader, in_tx));

        (Self { out_tx }, in_rx)
    }

    pub fn stdio() -> (Self, mpsc::Receiver<InboundMessage>) {
        Self::spawn(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl MessageChannel for StdioChannel {
    async fn send(&self, conversation: &ConversationId, text: &str) -> Result<MessageHandle> {
        let handle = MessageHandle::generate();
        let frame = OutboundFrame::Send {
            conversation_id: conversation.clone(),
            text: text.to_string(),
            handle: handle.clone(),
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        self.out_tx
            .send((frame, ack_tx))
            .await
            .map_err(|_| BridgeError::transport("stdio writer stopped"))?;
        match ack_rx.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(error)) => Err(BridgeError::transport(format!("stdout write failed: {error}"))),
            Err(_) => Err(BridgeError::transport("stdio writer stopped")),
        }
    }
}

async fn run_writer<W>(mut writer: W, mut rx: mpsc::Receiver<WriteRequest>)
where
    W: AsyncWrite + Unpin,
{
    while let Some((frame, ack)) = rx.recv().await {
        let result = match serde_json::to_string(&frame) {
            Ok(line) => write_line(&mut writer, &line).await,
            Err(error) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, error)),
        };
        if let Err(error) = &result {
            tracing::warn!(target = "relay_bridge::stdio", error = %error, "failed writing outbound frame");
        }
        let _ = ack.send(result);
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn run_reader<R>(reader: R, tx: mpsc::Sender<InboundMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(target = "relay_bridge::stdio", error = %error, "inbound read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_inbound(&line) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(target = "relay_bridge::stdio", error = %error, raw = %line, "ignoring invalid inbound frame");
            }
        }
    }
    tracing::info!(target = "relay_bridge::stdio", "inbound stream closed");
}

pub fn parse_inbound(line: &str) -> Result<InboundMessage> {
    let InboundFrame::Message(message) = serde_json::from_str::<InboundFrame>(line)?;
    Ok(message)
}
