//! Spawned conversation turns and their interrupt handles.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::group::{GroupConversation, GroupOutcome};
use super::single::{SingleConversation, TurnOutcome};
use super::TurnInput;
use crate::messages::ImageAttachment;

/// Cooperative interrupt for one running turn
///
/// Carries what the client reports having heard, so the cancelled turn
/// can record it during its own cleanup.
#[derive(Clone, Debug, Default)]
pub struct InterruptHandle {
    token: CancellationToken,
    heard: Arc<Mutex<Option<String>>>,
}

impl InterruptHandle {
    /// Fresh, not yet interrupted handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the interrupt
    ///
    /// Returns `false` when the turn was already interrupted; the first
    /// heard text wins.
    pub fn interrupt(&self, heard: Option<String>) -> bool {
        let mut slot = self.heard.lock();
        if self.token.is_cancelled() {
            return false;
        }
        *slot = heard;
        self.token.cancel();
        true
    }

    /// Whether [`interrupt`](Self::interrupt) was called
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once interrupted
    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }

    /// Heard text reported by the client, if any
    #[must_use]
    pub fn heard(&self) -> Option<String> {
        self.heard.lock().clone()
    }
}

/// How a spawned conversation ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationOutcome {
    /// Single-party turn
    Single(TurnOutcome),
    /// Group conversation
    Group(GroupOutcome),
}

/// A conversation running on its own task
pub struct ConversationTask {
    handle: InterruptHandle,
    join: Mutex<Option<JoinHandle<ConversationOutcome>>>,
}

impl ConversationTask {
    /// Spawn a single-party turn
    pub fn spawn_single(
        conversation: Arc<SingleConversation>,
        input: TurnInput,
        images: Vec<ImageAttachment>,
    ) -> Self {
        let handle = InterruptHandle::new();
        let task_handle = handle.clone();
        let join = tokio::spawn(async move {
            ConversationOutcome::Single(conversation.process(input, images, &task_handle).await)
        });
        Self {
            handle,
            join: Mutex::new(Some(join)),
        }
    }

    /// Spawn a group conversation
    pub fn spawn_group(
        conversation: GroupConversation,
        input: TurnInput,
        images: Vec<ImageAttachment>,
    ) -> Self {
        let handle = InterruptHandle::new();
        let task_handle = handle.clone();
        let join = tokio::spawn(async move {
            ConversationOutcome::Group(conversation.process(input, images, &task_handle).await)
        });
        Self {
            handle,
            join: Mutex::new(Some(join)),
        }
    }

    /// Whether the conversation has ended on its own (or was joined)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Interrupt and wait until the turn has recorded what was heard
    ///
    /// Returns `None` when the task was already interrupted or joined.
    pub async fn interrupt(&self, heard: Option<String>) -> Option<ConversationOutcome> {
        if !self.handle.interrupt(heard) {
            tracing::debug!("Conversation already interrupted");
            return None;
        }
        self.join().await
    }

    /// Wait for the conversation to end
    pub async fn join(&self) -> Option<ConversationOutcome> {
        let join = self.join.lock().take()?;
        match join.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(error = %e, "Conversation task panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_wins() {
        let handle = InterruptHandle::new();
        assert!(!handle.is_interrupted());
        assert!(handle.interrupt(Some("Hello wor".into())));
        assert!(!handle.interrupt(Some("Hello world".into())));
        assert!(handle.is_interrupted());
        assert_eq!(handle.heard().as_deref(), Some("Hello wor"));
    }

    #[tokio::test]
    async fn test_interrupted_resolves_for_clones() {
        let handle = InterruptHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.interrupted().await });
        handle.interrupt(None);
        task.await.unwrap();
        assert_eq!(handle.heard(), None);
    }
}
