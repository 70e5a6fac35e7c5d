//! WebSocket sink
//!
//! Writes each message as one text frame on the write half of a split
//! `tokio-tungstenite` stream. Reading the other half and feeding
//! [`ClientMessage`](crate::messages::ClientMessage)s to the router is left
//! to the server that accepted the connection.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::{MessageSink, TransportError};

/// Sink over the write half of a websocket
pub struct WebSocketSink<S> {
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
}

impl<S> WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap the write half of a split websocket
    pub fn new(writer: SplitSink<WebSocketStream<S>, Message>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Send a close frame
    pub async fn close(&self) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl<S> MessageSink for WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        use tokio_tungstenite::tungstenite::Error;

        let mut writer = self.writer.lock().await;
        match writer.send(Message::Text(text)).await {
            Ok(()) => Ok(()),
            Err(Error::ConnectionClosed | Error::AlreadyClosed) => Err(TransportError::Closed),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}
