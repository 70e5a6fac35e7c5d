//! Transport Boundary
//!
//! Everything the core needs from a client connection is "send this JSON
//! string". [`MessageSink`] is that contract; how bytes reach the client
//! (a channel, a websocket, a test buffer) is the sink's business.
//!
//! # Architecture
//!
//! ```text
//!   SingleConversation ─┐
//!   GroupConversation ──┼─► ClientRegistry ─► Arc<dyn MessageSink> ─► client
//!   TtsTaskManager ─────┘      (ClientId → sink)
//! ```
//!
//! Available sinks:
//! - [`ChannelSink`]: forwards serialized messages into an mpsc channel
//! - `WebSocketSink` (feature `websocket`): writes text frames to a socket

mod channel;
mod registry;
#[cfg(feature = "websocket")]
pub mod websocket;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::ServerMessage;

pub use channel::ChannelSink;
pub use registry::{BroadcastResult, ClientRegistry};

/// Identifier of one connected client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Failure delivering a message to a client
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is gone
    #[error("connection closed")]
    Closed,

    /// The message could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying transport rejected the write
    #[error("send failed: {0}")]
    Send(String),
}

/// Outbound half of a client connection
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send one serialized JSON message
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Serialize and send a wire message
    async fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)?;
        self.send_text(text).await
    }
}
