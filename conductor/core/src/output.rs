//! Agent Output Types
//!
//! What an agent hands back to the conversation layer, one item at a time:
//! either a sentence to display and speak, or a ready-made audio clip.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Text shown to the user, with the speaker it belongs to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayText {
    /// Text to display
    pub text: String,
    /// Speaker name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Speaker avatar (URL or asset name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl DisplayText {
    /// Display text without speaker info
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Attach speaker info
    #[must_use]
    pub fn with_speaker(mut self, name: impl Into<String>, avatar: Option<String>) -> Self {
        self.name = Some(name.into());
        self.avatar = avatar;
        self
    }
}

/// One expression value: a model-specific index or a named expression
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    /// Index into the model's expression list
    Index(i64),
    /// Named expression
    Name(String),
}

/// Avatar actions attached to a sentence
///
/// Absent fields are omitted from the wire format.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actions {
    /// Facial expressions, in order of appearance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Vec<Expression>>,
    /// Pictures to show
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pictures: Option<Vec<String>>,
    /// Sounds to play
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sounds: Option<Vec<String>>,
}

impl Actions {
    /// Whether no action is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expressions.is_none() && self.pictures.is_none() && self.sounds.is_none()
    }
}

/// A sentence ready to display and speak
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentenceOutput {
    /// What the user sees
    pub display_text: DisplayText,
    /// What the synthesizer says (empty means nothing is spoken)
    pub tts_text: String,
    /// Avatar actions for this sentence
    pub actions: Actions,
}

/// Pre-synthesized audio produced by the agent itself
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioOutput {
    /// WAV file on disk
    pub audio_path: PathBuf,
    /// What the user sees
    pub display_text: DisplayText,
    /// Transcript of the audio
    pub transcript: String,
    /// Avatar actions for this clip
    pub actions: Actions,
}

/// One item of an agent's response stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentOutput {
    /// Text to display and synthesize
    Sentence(SentenceOutput),
    /// Audio to forward as-is
    Audio(AudioOutput),
}

impl AgentOutput {
    /// The text this output contributes to the full response
    #[must_use]
    pub fn response_text(&self) -> &str {
        match self {
            Self::Sentence(sentence) => &sentence.display_text.text,
            Self::Audio(audio) => &audio.transcript,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_skip_absent_fields() {
        let actions = Actions {
            expressions: Some(vec![Expression::Index(3), Expression::Name("joy".into())]),
            ..Actions::default()
        };
        let json = serde_json::to_value(&actions).unwrap();
        assert_eq!(json, serde_json::json!({"expressions": [3, "joy"]}));
        assert!(Actions::default().is_empty());
        assert_eq!(serde_json::to_value(Actions::default()).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_display_text_speaker() {
        let display = DisplayText::new("Hi").with_speaker("Mao", Some("mao.png".into()));
        let json = serde_json::to_value(&display).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"text": "Hi", "name": "Mao", "avatar": "mao.png"})
        );
    }
}
