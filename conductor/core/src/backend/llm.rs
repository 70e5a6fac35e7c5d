//! LLM Backend Trait
//!
//! The agent talks to a language model through [`LlmBackend`]. The backend
//! only has to produce tokens; memory, sentence division and everything
//! downstream live in the core.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Token stream events from LLM backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A token from the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// Author of a chat message sent to the model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions
    System,
    /// The user
    User,
    /// The model
    Assistant,
}

/// One message of the model's context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: ChatRole,
    /// Text
    pub content: String,
}

impl ChatMessage {
    /// Message with the given role
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }
}

/// Configuration for LLM requests
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    /// Conversation so far, oldest first
    pub messages: Vec<ChatMessage>,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Temperature (0.0-1.0, higher = more creative)
    pub temperature: f32,
    /// System prompt, sent ahead of `messages`
    pub system: Option<String>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            model: String::new(),
            temperature: 0.7,
            system: None,
        }
    }
}

impl LlmRequest {
    /// Create a request over a conversation
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama", "OpenAI")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// The channel is closed after `Complete` or `Error`.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;
}

/// Adapt a token channel into a stream of token texts
///
/// `Complete` (or a closed channel) ends the stream; `Error` yields one
/// error and then ends it.
pub fn token_stream(rx: mpsc::Receiver<StreamingToken>) -> BoxStream<'static, anyhow::Result<String>> {
    stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        match rx.recv().await? {
            StreamingToken::Token(text) => Some((Ok(text), Some(rx))),
            StreamingToken::Complete { .. } => None,
            StreamingToken::Error(e) => Some((Err(anyhow::anyhow!(e)), None)),
        }
    })
    .boxed()
}
