//! Wire Messages
//!
//! JSON messages exchanged with a connected client. Every message is an
//! object with a kebab-case `type` field:
//!
//! ```text
//!   server → client   control, full-text, audio, backend-synth-complete, error,
//!                     user-input-transcription, interrupt-signal, group-update, ...
//!   client → server   text-input, mic-audio-data, mic-audio-end, ai-speak-signal,
//!                     interrupt-signal, frontend-playback-complete, audio-play-start, ...
//! ```

use serde::{Deserialize, Serialize};

use crate::audio::AudioPayload;
use crate::history::HistoryMessage;
use crate::output::DisplayText;
use crate::transport::ClientId;

/// Text sent to clients when a group conversation is interrupted
pub const CONVERSATION_INTERRUPTED: &str = "conversation-interrupted";

/// Payload of a `control` message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlSignal {
    /// A turn has started
    ConversationChainStart,
    /// A turn has ended
    ConversationChainEnd,
    /// The next output starts a new chat bubble
    ForceNewMessage,
    /// The client should (re)start its microphone
    StartMic,
}

// ============================================
// Server → Client
// ============================================

/// Messages from the core to a client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Turn lifecycle signal
    Control {
        /// Which signal
        text: ControlSignal,
    },

    /// Status text shown outside the chat (e.g. "Thinking...")
    FullText {
        /// Text to show
        text: String,
    },

    /// One sentence of audio (or a silent payload)
    Audio(AudioPayload),

    /// Every audio payload of the turn has been sent
    BackendSynthComplete,

    /// A turn-aborting failure
    Error {
        /// Human-readable description
        message: String,
    },

    /// What the speech recognizer heard
    UserInputTranscription {
        /// Transcribed text
        text: String,
    },

    /// A group conversation was interrupted
    InterruptSignal {
        /// Always [`CONVERSATION_INTERRUPTED`]
        text: String,
    },

    /// Current group membership
    GroupUpdate {
        /// Members, in join order
        members: Vec<ClientId>,
        /// Whether the receiver owns the group
        is_owner: bool,
    },

    /// Outcome of an add/remove request
    GroupOperationResult {
        /// Whether the operation was applied
        success: bool,
        /// Explanation
        message: String,
    },

    /// Stored histories of the character
    HistoryList {
        /// History IDs
        histories: Vec<String>,
    },

    /// Messages of the selected history, without system entries
    HistoryData {
        /// Messages in order
        messages: Vec<HistoryMessage>,
    },

    /// A fresh history was created and selected
    NewHistoryCreated {
        /// ID of the new history
        history_uid: String,
    },

    /// Outcome of a delete request
    HistoryDeleted {
        /// Whether the history existed
        success: bool,
        /// ID of the deleted history
        history_uid: String,
    },
}

impl ServerMessage {
    /// `control` message
    #[must_use]
    pub fn control(signal: ControlSignal) -> Self {
        Self::Control { text: signal }
    }

    /// `full-text` message
    pub fn full_text(text: impl Into<String>) -> Self {
        Self::FullText { text: text.into() }
    }

    /// `error` message
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Group-wide `interrupt-signal`
    #[must_use]
    pub fn conversation_interrupted() -> Self {
        Self::InterruptSignal {
            text: CONVERSATION_INTERRUPTED.to_string(),
        }
    }
}

// ============================================
// Client → Server
// ============================================

/// Image attached to a text input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// Where the image came from (camera, screen, clipboard, upload)
    pub source: String,
    /// Data URL or remote URL
    pub data: String,
    /// MIME type
    pub mime_type: String,
}

/// Messages from a client to the core
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Typed user input; starts a turn
    TextInput {
        /// The text
        text: String,
        /// Attached images
        #[serde(default)]
        images: Vec<ImageAttachment>,
    },

    /// A chunk of microphone samples
    MicAudioData {
        /// Mono f32 samples
        audio: Vec<f32>,
    },

    /// End of the utterance; starts a turn with the buffered samples
    MicAudioEnd {
        /// Attached images
        #[serde(default)]
        images: Vec<ImageAttachment>,
    },

    /// Ask the character to speak first
    AiSpeakSignal,

    /// The user interrupted; `text` is what they heard so far
    InterruptSignal {
        /// Heard text
        #[serde(default)]
        text: String,
    },

    /// The client finished playing the turn's audio
    FrontendPlaybackComplete,

    /// The client started playing a payload
    AudioPlayStart {
        /// Text of the payload being played
        #[serde(default)]
        display_text: Option<DisplayText>,
    },

    /// Invite another client into the sender's group
    AddClientToGroup {
        /// Client to add
        invitee_uid: ClientId,
    },

    /// Remove a client from the sender's group
    RemoveClientFromGroup {
        /// Client to remove
        target_uid: ClientId,
    },

    /// Ask for a `group-update`
    RequestGroupInfo,

    /// Ask for the stored history IDs
    FetchHistoryList,

    /// Load a history into the agent and send it back
    FetchAndSetHistory {
        /// History to load
        history_uid: String,
    },

    /// Start a new, empty history
    CreateNewHistory,

    /// Delete a stored history
    DeleteHistory {
        /// History to delete
        history_uid: String,
    },
}

impl ClientMessage {
    /// The `type` tag of this message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextInput { .. } => "text-input",
            Self::MicAudioData { .. } => "mic-audio-data",
            Self::MicAudioEnd { .. } => "mic-audio-end",
            Self::AiSpeakSignal => "ai-speak-signal",
            Self::InterruptSignal { .. } => "interrupt-signal",
            Self::FrontendPlaybackComplete => "frontend-playback-complete",
            Self::AudioPlayStart { .. } => "audio-play-start",
            Self::AddClientToGroup { .. } => "add-client-to-group",
            Self::RemoveClientFromGroup { .. } => "remove-client-from-group",
            Self::RequestGroupInfo => "request-group-info",
            Self::FetchHistoryList => "fetch-history-list",
            Self::FetchAndSetHistory { .. } => "fetch-and-set-history",
            Self::CreateNewHistory => "create-new-history",
            Self::DeleteHistory { .. } => "delete-history",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Actions;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_control_wire_format() {
        let msg = ServerMessage::control(ControlSignal::ForceNewMessage);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "control", "text": "force-new-message"})
        );
    }

    #[test]
    fn test_silent_audio_wire_format() {
        let payload = AudioPayload::silent(Some(DisplayText::new("Hmm.")), Some(Actions::default()));
        let value = serde_json::to_value(ServerMessage::Audio(payload)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "audio",
                "audio": null,
                "volumes": [],
                "slice_length": 20,
                "display_text": {"text": "Hmm."},
                "actions": {},
                "forwarded": false
            })
        );
    }

    #[test]
    fn test_unit_variants_wire_format() {
        assert_eq!(
            serde_json::to_value(ServerMessage::BackendSynthComplete).unwrap(),
            json!({"type": "backend-synth-complete"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::conversation_interrupted()).unwrap(),
            json!({"type": "interrupt-signal", "text": "conversation-interrupted"})
        );
    }

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "interrupt-signal", "text": "Hello wor"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::InterruptSignal {
                text: "Hello wor".into()
            }
        );

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "frontend-playback-complete"})).unwrap();
        assert_eq!(msg.kind(), "frontend-playback-complete");

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "text-input", "text": "hi"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::TextInput {
                text: "hi".into(),
                images: Vec::new()
            }
        );
    }

    #[test]
    fn test_unknown_client_message_is_rejected() {
        let result = serde_json::from_value::<ClientMessage>(json!({"type": "switch-config"}));
        assert!(result.is_err());
    }
}
