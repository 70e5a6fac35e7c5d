//! Channel-backed sink
//!
//! Used when the connection is driven by the embedding application (it
//! drains the receiver and writes to the real socket) and in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{MessageSink, TransportError};

/// Sink that forwards serialized messages into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    /// Wrap an existing sender
    #[must_use]
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver that drains it
    #[must_use]
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Whether the receiving side is still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.tx.send(text).await.map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ControlSignal, ServerMessage};

    #[tokio::test]
    async fn test_send_serializes_message() {
        let (sink, mut rx) = ChannelSink::pair(4);
        sink.send(&ServerMessage::control(ControlSignal::ConversationChainStart))
            .await
            .unwrap();

        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "control", "text": "conversation-chain-start"})
        );
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (sink, rx) = ChannelSink::pair(1);
        drop(rx);
        assert!(!sink.is_connected());
        let result = sink.send_text("{}".into()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
