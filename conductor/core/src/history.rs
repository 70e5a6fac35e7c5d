//! Chat History
//!
//! The persistence layer is a collaborator: the core only needs to append
//! messages, rewrite the latest one after an interrupt, and read a history
//! back. [`InMemoryHistory`] is the reference store used by tests and by
//! embedders that do not persist anything.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// System note stored after an interrupted response
pub const INTERRUPTED_NOTE: &str = "[Interrupted by user]";

/// Author of a history entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    /// The user
    Human,
    /// The character
    Ai,
    /// Bookkeeping notes
    System,
}

/// One stored message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Author
    pub role: HistoryRole,
    /// Message text
    pub content: String,
    /// Speaker name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Speaker avatar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// RFC 3339 creation time
    pub timestamp: String,
}

impl HistoryMessage {
    /// New message stamped with the current time
    pub fn new(role: HistoryRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            avatar: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Attach speaker info
    #[must_use]
    pub fn with_speaker(mut self, name: Option<String>, avatar: Option<String>) -> Self {
        self.name = name;
        self.avatar = avatar;
        self
    }
}

/// Append-only chat history, keyed by character config and history ID
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create an empty history and return its ID
    async fn create_history(&self, conf_uid: &str) -> anyhow::Result<String>;

    /// Append a message
    async fn store_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        message: HistoryMessage,
    ) -> anyhow::Result<()>;

    /// Replace the content of the latest message if it has `role`
    ///
    /// Returns false when the history is empty or the latest message has a
    /// different role.
    async fn modify_latest_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        role: HistoryRole,
        content: &str,
    ) -> anyhow::Result<bool>;

    /// All messages of a history, oldest first
    async fn get_history(&self, conf_uid: &str, history_uid: &str)
        -> anyhow::Result<Vec<HistoryMessage>>;

    /// History IDs of a character, oldest first
    async fn list_histories(&self, conf_uid: &str) -> anyhow::Result<Vec<String>>;

    /// Delete a history; returns whether it existed
    async fn delete_history(&self, conf_uid: &str, history_uid: &str) -> anyhow::Result<bool>;
}

/// Generate a history ID: `YYYY-mm-dd_HH-MM-SS_<uuid>`
#[must_use]
pub fn new_history_uid() -> String {
    format!(
        "{}_{}",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"),
        uuid::Uuid::new_v4().simple()
    )
}

type HistoryKey = (String, String);

/// Process-local history store
#[derive(Default)]
pub struct InMemoryHistory {
    histories: Mutex<HashMap<HistoryKey, Vec<HistoryMessage>>>,
    order: Mutex<Vec<HistoryKey>>,
}

impl InMemoryHistory {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(conf_uid: &str, history_uid: &str) -> HistoryKey {
    (conf_uid.to_string(), history_uid.to_string())
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn create_history(&self, conf_uid: &str) -> anyhow::Result<String> {
        let uid = new_history_uid();
        let k = key(conf_uid, &uid);
        self.histories.lock().insert(k.clone(), Vec::new());
        self.order.lock().push(k);
        tracing::debug!(conf_uid, history_uid = %uid, "History created");
        Ok(uid)
    }

    async fn store_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        message: HistoryMessage,
    ) -> anyhow::Result<()> {
        let k = key(conf_uid, history_uid);
        let mut histories = self.histories.lock();
        if !histories.contains_key(&k) {
            self.order.lock().push(k.clone());
        }
        histories.entry(k).or_default().push(message);
        Ok(())
    }

    async fn modify_latest_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        role: HistoryRole,
        content: &str,
    ) -> anyhow::Result<bool> {
        let mut histories = self.histories.lock();
        let Some(latest) = histories
            .get_mut(&key(conf_uid, history_uid))
            .and_then(|messages| messages.last_mut())
        else {
            return Ok(false);
        };
        if latest.role != role {
            tracing::warn!(
                expected = ?role,
                actual = ?latest.role,
                "Latest history message has a different role"
            );
            return Ok(false);
        }
        latest.content = content.to_string();
        Ok(true)
    }

    async fn get_history(
        &self,
        conf_uid: &str,
        history_uid: &str,
    ) -> anyhow::Result<Vec<HistoryMessage>> {
        Ok(self
            .histories
            .lock()
            .get(&key(conf_uid, history_uid))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_histories(&self, conf_uid: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .order
            .lock()
            .iter()
            .filter(|(conf, _)| conf == conf_uid)
            .map(|(_, uid)| uid.clone())
            .collect())
    }

    async fn delete_history(&self, conf_uid: &str, history_uid: &str) -> anyhow::Result<bool> {
        let k = key(conf_uid, history_uid);
        self.order.lock().retain(|existing| existing != &k);
        Ok(self.histories.lock().remove(&k).is_some())
    }
}
