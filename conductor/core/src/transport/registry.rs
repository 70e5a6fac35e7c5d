//! Client Registry
//!
//! Maps client IDs to their sinks. Reads (sends, broadcasts) vastly
//! outnumber writes (connect/disconnect), so the map sits behind a
//! `parking_lot::RwLock` and no lock is held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{ClientId, MessageSink, TransportError};
use crate::messages::ServerMessage;

/// Result of a broadcast operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Number of clients that received the message
    pub successful: usize,
    /// Number of clients that failed to receive the message
    pub failed: usize,
    /// IDs of clients that failed
    pub failed_ids: Vec<ClientId>,
}

impl BroadcastResult {
    /// Check if all recipients received the message
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Check if no recipients received the message
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.successful == 0
    }
}

/// Registry of connected clients
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<RwLock<HashMap<ClientId, Arc<dyn MessageSink>>>>,
}

impl ClientRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, replacing any previous sink under the same ID
    pub fn register(&self, id: ClientId, sink: Arc<dyn MessageSink>) {
        self.inner.write().insert(id.clone(), sink);
        tracing::info!(client = %id, "Client registered");
    }

    /// Unregister a client
    pub fn unregister(&self, id: &ClientId) -> Option<Arc<dyn MessageSink>> {
        let sink = self.inner.write().remove(id);
        if sink.is_some() {
            tracing::info!(client = %id, "Client unregistered");
        }
        sink
    }

    /// Sink of a connected client
    #[must_use]
    pub fn get(&self, id: &ClientId) -> Option<Arc<dyn MessageSink>> {
        self.inner.read().get(id).cloned()
    }

    /// Check if a client is registered
    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Number of connected clients
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Send to one client
    pub async fn send_to(&self, id: &ClientId, message: &ServerMessage) -> Result<(), TransportError> {
        let sink = self.get(id).ok_or(TransportError::Closed)?;
        sink.send(message).await
    }

    /// Send to every listed member except `exclude`
    ///
    /// A failing member is logged and counted; the others still receive the
    /// message.
    pub async fn broadcast(
        &self,
        members: &[ClientId],
        message: &ServerMessage,
        exclude: Option<&ClientId>,
    ) -> BroadcastResult {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                return BroadcastResult {
                    failed: members.len(),
                    failed_ids: members.to_vec(),
                    ..BroadcastResult::default()
                };
            }
        };

        // Collect sinks first so the lock is not held across sends
        let targets: Vec<(ClientId, Option<Arc<dyn MessageSink>>)> = {
            let inner = self.inner.read();
            members
                .iter()
                .filter(|id| Some(*id) != exclude)
                .map(|id| (id.clone(), inner.get(id).cloned()))
                .collect()
        };

        let mut result = BroadcastResult::default();
        for (id, sink) in targets {
            let sent = match sink {
                Some(sink) => sink.send_text(text.clone()).await,
                None => Err(TransportError::Closed),
            };
            match sent {
                Ok(()) => result.successful += 1,
                Err(e) => {
                    tracing::warn!(client = %id, error = %e, "Broadcast to member failed");
                    result.failed += 1;
                    result.failed_ids.push(id);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ControlSignal;
    use crate::transport::ChannelSink;

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = ClientRegistry::new();
        let (sink, _rx) = ChannelSink::pair(4);
        let id = ClientId::new("a");

        registry.register(id.clone(), Arc::new(sink));
        assert!(registry.contains(&id));
        assert_eq!(registry.count(), 1);

        assert!(registry.unregister(&id).is_some());
        assert!(registry.unregister(&id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_and_survives_failures() {
        let registry = ClientRegistry::new();
        let (a, mut a_rx) = ChannelSink::pair(4);
        let (b, mut b_rx) = ChannelSink::pair(4);
        let (c, c_rx) = ChannelSink::pair(4);
        drop(c_rx);
        registry.register("a".into(), Arc::new(a));
        registry.register("b".into(), Arc::new(b));
        registry.register("c".into(), Arc::new(c));

        let members: Vec<ClientId> = ["a", "b", "c", "gone"].into_iter().map(ClientId::from).collect();
        let message = ServerMessage::control(ControlSignal::ConversationChainEnd);
        let result = registry
            .broadcast(&members, &message, Some(&ClientId::new("a")))
            .await;

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(result.failed_ids, vec![ClientId::new("c"), ClientId::new("gone")]);
        assert!(!result.all_succeeded());
        assert!(!result.all_failed());

        assert!(b_rx.recv().await.is_some());
        assert!(a_rx.try_recv().is_err(), "excluded member receives nothing");
    }

    #[tokio::test]
    async fn test_send_to_unknown_client() {
        let registry = ClientRegistry::new();
        let result = registry
            .send_to(&"nobody".into(), &ServerMessage::BackendSynthComplete)
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
