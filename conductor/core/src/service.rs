//! Service Context
//!
//! Everything one client's conversations need, built once and passed by
//! reference: the character, its agent and speech engines, the history
//! store and the turn settings. Nothing in the core looks these up
//! globally.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::audio::DEFAULT_SLICE_MS;
use crate::backend::{AsrEngine, TtsEngine};
use crate::conversation::tts_manager::{TtsTaskManager, DEFAULT_MAX_CONCURRENT_SYNTHESIS};
use crate::history::{HistoryMessage, HistoryRole, HistoryStore, INTERRUPTED_NOTE};
use crate::transport::ClientId;

/// Who the character is
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    /// Character config ID; histories are stored under it
    pub conf_uid: String,
    /// Display name
    pub name: String,
    /// Avatar asset
    pub avatar: Option<String>,
    /// How the user is addressed
    pub human_name: String,
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self {
            conf_uid: "default".to_string(),
            name: "Assistant".to_string(),
            avatar: None,
            human_name: "Human".to_string(),
        }
    }
}

/// Per-turn behavior
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// How long to wait for `frontend-playback-complete`
    pub playback_timeout_secs: u64,
    /// Status text sent when a turn starts
    pub thinking_text: String,
    /// Volume envelope slice length
    pub audio_slice_ms: u32,
    /// Bound on concurrent syntheses per conversation
    pub max_concurrent_synthesis: usize,
    /// Stop a group conversation after this many member turns
    pub max_group_turns: Option<usize>,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            playback_timeout_secs: 600,
            thinking_text: "Thinking...".to_string(),
            audio_slice_ms: DEFAULT_SLICE_MS,
            max_concurrent_synthesis: DEFAULT_MAX_CONCURRENT_SYNTHESIS,
            max_group_turns: None,
        }
    }
}

impl ConversationSettings {
    /// Playback acknowledgement timeout
    #[must_use]
    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_secs)
    }

    /// A TTS manager configured from these settings
    #[must_use]
    pub fn tts_manager(&self) -> TtsTaskManager {
        TtsTaskManager::new(self.audio_slice_ms, self.max_concurrent_synthesis)
    }
}

/// Dependencies of one client's conversations
pub struct ServiceContext {
    /// The character
    pub character: CharacterProfile,
    /// The agent producing responses
    pub agent: Arc<dyn Agent>,
    /// Speech synthesis
    pub tts: Arc<dyn TtsEngine>,
    /// Speech recognition, required for audio input
    pub asr: Option<Arc<dyn AsrEngine>>,
    /// History persistence
    pub history: Option<Arc<dyn HistoryStore>>,
    /// Turn settings
    pub settings: ConversationSettings,
    history_uid: RwLock<Option<String>>,
}

impl ServiceContext {
    /// Context with the required collaborators
    pub fn new(character: CharacterProfile, agent: Arc<dyn Agent>, tts: Arc<dyn TtsEngine>) -> Self {
        Self {
            character,
            agent,
            tts,
            asr: None,
            history: None,
            settings: ConversationSettings::default(),
            history_uid: RwLock::new(None),
        }
    }

    /// Set the speech recognizer
    #[must_use]
    pub fn with_asr(mut self, asr: Arc<dyn AsrEngine>) -> Self {
        self.asr = Some(asr);
        self
    }

    /// Set the history store and the active history
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>, history_uid: Option<String>) -> Self {
        self.history = Some(history);
        self.history_uid = RwLock::new(history_uid);
        self
    }

    /// Set the turn settings
    #[must_use]
    pub fn with_settings(mut self, settings: ConversationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Active history ID
    #[must_use]
    pub fn history_uid(&self) -> Option<String> {
        self.history_uid.read().clone()
    }

    /// Switch the active history
    pub fn set_history_uid(&self, history_uid: Option<String>) {
        *self.history_uid.write() = history_uid;
    }

    /// Append to the active history, if there is one
    ///
    /// Failures are logged; history is never allowed to abort a turn.
    pub async fn store_history(&self, role: HistoryRole, content: &str, speaker: Option<&CharacterProfile>) {
        let (Some(store), Some(uid)) = (&self.history, self.history_uid()) else {
            return;
        };
        let mut message = HistoryMessage::new(role, content);
        if let Some(profile) = speaker {
            message = message.with_speaker(Some(profile.name.clone()), profile.avatar.clone());
        } else if role == HistoryRole::Human {
            message = message.with_speaker(Some(self.character.human_name.clone()), None);
        }
        if let Err(e) = store.store_message(&self.character.conf_uid, &uid, message).await {
            tracing::warn!(history_uid = %uid, error = %e, "Failed to store history message");
        }
    }

    /// Bring the agent and the history in line with what was heard
    ///
    /// The latest AI entry is rewritten to `heard` (or added when the
    /// response had not been stored yet) and an interruption note follows.
    pub async fn record_interrupt(&self, heard: &str) {
        self.agent.handle_interrupt(heard).await;

        let (Some(store), Some(uid)) = (&self.history, self.history_uid()) else {
            return;
        };
        let conf = &self.character.conf_uid;
        match store.modify_latest_message(conf, &uid, HistoryRole::Ai, heard).await {
            Ok(true) => {}
            Ok(false) if !heard.is_empty() => {
                self.store_history(HistoryRole::Ai, heard, Some(&self.character)).await;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(history_uid = %uid, error = %e, "Failed to rewrite interrupted message"),
        }
        self.store_history(HistoryRole::System, INTERRUPTED_NOTE, None).await;
    }
}

/// Creates a fresh context for each connecting client
pub trait ContextFactory: Send + Sync {
    /// Build the context for `client`
    fn create_context(&self, client: &ClientId) -> anyhow::Result<ServiceContext>;
}

impl<F> ContextFactory for F
where
    F: Fn(&ClientId) -> anyhow::Result<ServiceContext> + Send + Sync,
{
    fn create_context(&self, client: &ClientId) -> anyhow::Result<ServiceContext> {
        self(client)
    }
}
