//! Agent Contract
//!
//! An agent takes one turn's input and returns a lazy stream of
//! [`AgentOutput`]s. The conversation layer never looks inside: it only
//! iterates the stream, and tells the agent what the user actually heard
//! when a turn is interrupted.
//!
//! ```text
//!   BatchInput ─► Agent::chat ─► AgentStream ─► SentenceOutput | AudioOutput ─► TtsTaskManager
//!                      ▲
//!                      └── handle_interrupt(heard)   (keeps memory in line with what was heard)
//! ```

mod basic_memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ConversationError;
use crate::messages::ImageAttachment;
use crate::output::AgentOutput;

pub use basic_memory::BasicMemoryAgent;

/// Stream of one turn's outputs
pub type AgentStream = BoxStream<'static, Result<AgentOutput, ConversationError>>;

/// Where a text input came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    /// Typed or transcribed user input
    #[default]
    Input,
    /// Pasted from the clipboard
    Clipboard,
}

/// One piece of text input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextData {
    /// Origin
    pub source: TextSource,
    /// Text
    pub content: String,
    /// Speaker, when the input comes from a named participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
}

/// Everything an agent receives for one turn
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInput {
    /// Text inputs, in order
    pub texts: Vec<TextData>,
    /// Attached images
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
}

impl BatchInput {
    /// Single user text
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            texts: vec![TextData {
                source: TextSource::Input,
                content: content.into(),
                from_name: None,
            }],
            images: Vec::new(),
        }
    }

    /// Single text attributed to a named speaker
    pub fn from_speaker(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut input = Self::text(content);
        input.texts[0].from_name = Some(name.into());
        input
    }

    /// Attach images
    #[must_use]
    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    /// Render the text inputs as one prompt
    ///
    /// Named inputs are prefixed with `name: `; clipboard content is
    /// labeled as such.
    #[must_use]
    pub fn prompt(&self) -> String {
        self.texts
            .iter()
            .map(|t| match (&t.from_name, t.source) {
                (Some(name), _) => format!("{name}: {}", t.content),
                (None, TextSource::Clipboard) => format!("[Clipboard content]: {}", t.content),
                (None, TextSource::Input) => t.content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A conversational agent
#[async_trait]
pub trait Agent: Send + Sync {
    /// Start one turn
    ///
    /// Errors returned here, and errors inside the stream, abort the turn.
    async fn chat(&self, input: BatchInput) -> Result<AgentStream, ConversationError>;

    /// Record that the last response was cut off after `heard`
    ///
    /// Calling this again before the next [`chat`](Self::chat) has no
    /// effect.
    async fn handle_interrupt(&self, heard: &str);

    /// Replace the agent's memory with a stored history
    async fn set_memory_from_history(
        &self,
        conf_uid: &str,
        history_uid: &str,
    ) -> Result<(), ConversationError>;

    /// Tell the agent it is one of several speakers
    async fn start_group_conversation(&self, _human_name: &str, _ai_participants: &[String]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_rendering() {
        let mut input = BatchInput::from_speaker("Human", "hello");
        input.texts.push(TextData {
            source: TextSource::Clipboard,
            content: "pasted".into(),
            from_name: None,
        });
        assert_eq!(input.prompt(), "Human: hello\n[Clipboard content]: pasted");
        assert_eq!(BatchInput::text("hi").prompt(), "hi");
    }
}
