//! Response Correlator
//!
//! Lets a turn wait for a specific inbound message from a specific client,
//! typically `frontend-playback-complete` after the last audio payload.
//!
//! # Architecture
//!
//! ```text
//!   turn task                       router (inbound messages)
//!   ─────────                       ─────────────────────────
//!   register(client, type) ──┐
//!   send backend-synth-complete     │
//!   pending.wait(timeout) ◄──┼───── deliver(client, {"type": type, ...})
//!                            │
//!          DashMap<(client, type), oneshot::Sender<Value>>
//! ```
//!
//! A waiter is registered *before* the prompting message is sent so a fast
//! client reply cannot arrive ahead of it. Each waiter is satisfied at most
//! once. `cleanup` drops every waiter of a client, which wakes the waiting
//! turns with `None`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::transport::ClientId;

type WaitKey = (ClientId, String);

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Value>,
}

/// Routes client replies to the turns waiting for them
#[derive(Clone, Default)]
pub struct ResponseCorrelator {
    waiters: Arc<DashMap<WaitKey, Waiter>>,
    next_id: Arc<AtomicU64>,
}

/// A registered wait that has not been consumed yet
pub struct PendingResponse {
    key: WaitKey,
    id: u64,
    rx: oneshot::Receiver<Value>,
    waiters: Arc<DashMap<WaitKey, Waiter>>,
}

impl ResponseCorrelator {
    /// Create an empty correlator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `response_type` from `client`
    ///
    /// A previous waiter for the same pair is replaced and resolves to
    /// `None`.
    pub fn register(&self, client: &ClientId, response_type: &str) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (client.clone(), response_type.to_string());
        if self.waiters.insert(key.clone(), Waiter { id, tx }).is_some() {
            tracing::debug!(client = %client, response_type, "Replaced existing waiter");
        }
        PendingResponse {
            key,
            id,
            rx,
            waiters: Arc::clone(&self.waiters),
        }
    }

    /// Register and wait in one step
    pub async fn wait_for(
        &self,
        client: &ClientId,
        response_type: &str,
        timeout: Option<Duration>,
    ) -> Option<Value> {
        self.register(client, response_type).wait(timeout).await
    }

    /// Hand an inbound message to its waiter
    ///
    /// Returns whether a waiter consumed the message.
    pub fn deliver(&self, client: &ClientId, message: &Value) -> bool {
        let Some(response_type) = message.get("type").and_then(Value::as_str) else {
            return false;
        };
        let key = (client.clone(), response_type.to_string());
        match self.waiters.remove(&key) {
            Some((_, waiter)) => waiter.tx.send(message.clone()).is_ok(),
            None => false,
        }
    }

    /// Release every pending wait of a client
    pub fn cleanup(&self, client: &ClientId) {
        let before = self.waiters.len();
        self.waiters.retain(|(id, _), _| id != client);
        let released = before.saturating_sub(self.waiters.len());
        if released > 0 {
            tracing::debug!(client = %client, released, "Released pending waits");
        }
    }

    /// Number of pending waits
    #[must_use]
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

impl PendingResponse {
    /// Wait for the reply
    ///
    /// Returns `None` on timeout or when the wait was released by
    /// [`ResponseCorrelator::cleanup`].
    pub async fn wait(self, timeout: Option<Duration>) -> Option<Value> {
        let Self { key, id, rx, waiters } = self;
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    tracing::warn!(
                        client = %key.0,
                        response_type = %key.1,
                        timeout_secs = limit.as_secs_f64(),
                        "Timed out waiting for client response"
                    );
                    None
                }
            },
            None => rx.await.ok(),
        };
        waiters.remove_if(&key, |_, waiter| waiter.id == id);
        received
    }
}
