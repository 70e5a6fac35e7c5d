//! Conversation Error Taxonomy
//!
//! Every failure a turn can hit maps onto one variant here. Only two of them
//! ever reach the client:
//!
//! | Variant         | Origin                         | Handling                          |
//! |-----------------|--------------------------------|-----------------------------------|
//! | `Transcription` | ASR engine                     | abort turn, `{"type":"error"}`    |
//! | `Agent`         | agent output stream            | abort turn, `{"type":"error"}`    |
//! | `Synthesis`     | one sentence's TTS             | silent payload, turn continues    |
//! | `Transport`     | a client sink                  | logged per member                 |
//! | `History`       | chat history store             | logged                            |
//! | `Interrupted`   | user interrupt                 | cooperative cancel, keep heard    |
//!
//! Correlation timeouts are not errors at all: the correlator returns `None`.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised while running a conversation turn
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Speech-to-text failed on the user's audio
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// The agent's output stream raised
    #[error("Agent failed: {0}")]
    Agent(String),

    /// Speech synthesis failed for one sentence
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// Sending to a client failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The chat history store rejected an operation
    #[error("History error: {0}")]
    History(String),

    /// The turn was cancelled by an interrupt request
    #[error("Conversation interrupted")]
    Interrupted,
}

impl ConversationError {
    /// Build an agent failure from any collaborator error
    pub fn agent(err: impl std::fmt::Display) -> Self {
        Self::Agent(err.to_string())
    }

    /// Build a transcription failure from any collaborator error
    pub fn transcription(err: impl std::fmt::Display) -> Self {
        Self::Transcription(err.to_string())
    }

    /// Whether this failure aborts the turn and is reported to the client
    #[must_use]
    pub fn is_client_visible(&self) -> bool {
        matches!(self, Self::Transcription(_) | Self::Agent(_))
    }

    /// Whether this is the cooperative cancellation path
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Result alias for conversation operations
pub type Result<T> = std::result::Result<T, ConversationError>;
