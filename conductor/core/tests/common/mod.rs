//! Shared fakes for the integration tests
//!
//! - `ScriptedAgent`: replies with a fixed list of sentences, optionally
//!   hanging afterwards until interrupted
//! - `ToneTts`: writes a short WAV into a temp dir after a random delay
//! - `FixedAsr`: always hears the same text

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;

use chorus_core::agent::{Agent, AgentStream, BatchInput};
use chorus_core::backend::{AsrEngine, TtsEngine};
use chorus_core::error::ConversationError;
use chorus_core::history::{HistoryStore, InMemoryHistory};
use chorus_core::output::{Actions, AgentOutput, DisplayText, SentenceOutput};
use chorus_core::service::{CharacterProfile, ConversationSettings, ServiceContext};
use chorus_core::transport::ClientId;

// =============================================================================
// Agent
// =============================================================================

/// Agent with a canned reply
#[derive(Default)]
pub struct ScriptedAgent {
    sentences: Vec<String>,
    speak: bool,
    hang: bool,
    fail: bool,
    pub prompts: Mutex<Vec<String>>,
    pub interrupts: Mutex<Vec<String>>,
    pub group_calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedAgent {
    /// Replies with `sentences`, each synthesized
    pub fn speaking(sentences: &[&str]) -> Self {
        Self {
            sentences: sentences.iter().map(ToString::to_string).collect(),
            speak: true,
            ..Self::default()
        }
    }

    /// Replies with `sentences` as silent payloads (no synthesis)
    pub fn silent(sentences: &[&str]) -> Self {
        Self {
            sentences: sentences.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Never ends its stream after the sentences
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fails every chat
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn output(&self, sentence: &str) -> AgentOutput {
        AgentOutput::Sentence(SentenceOutput {
            display_text: DisplayText::new(sentence),
            tts_text: if self.speak { sentence.to_string() } else { String::new() },
            actions: Actions::default(),
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn chat(&self, input: BatchInput) -> Result<AgentStream, ConversationError> {
        self.prompts.lock().push(input.prompt());
        if self.fail {
            return Err(ConversationError::agent("model offline"));
        }
        let outputs: Vec<Result<AgentOutput, ConversationError>> =
            self.sentences.iter().map(|s| Ok(self.output(s))).collect();
        let stream = futures::stream::iter(outputs);
        if self.hang {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }

    async fn handle_interrupt(&self, heard: &str) {
        self.interrupts.lock().push(heard.to_string());
    }

    async fn set_memory_from_history(
        &self,
        _conf_uid: &str,
        _history_uid: &str,
    ) -> Result<(), ConversationError> {
        Ok(())
    }

    async fn start_group_conversation(&self, _human_name: &str, ai_participants: &[String]) {
        self.group_calls.lock().push(ai_participants.to_vec());
    }
}

// =============================================================================
// Speech engines
// =============================================================================

/// Writes a short tone after up to `max_delay_ms` of simulated latency
pub struct ToneTts {
    dir: PathBuf,
    max_delay_ms: u64,
    pub requests: Mutex<Vec<String>>,
}

impl ToneTts {
    pub fn new(dir: &tempfile::TempDir, max_delay_ms: u64) -> Self {
        Self {
            dir: dir.path().to_path_buf(),
            max_delay_ms,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TtsEngine for ToneTts {
    async fn generate_audio(&self, text: &str, file_stem: &str) -> anyhow::Result<PathBuf> {
        self.requests.lock().push(text.to_string());
        let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let path = self.dir.join(format!("{file_stem}.wav"));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 1000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for _ in 0..40 {
            writer.write_sample(2000_i16)?;
        }
        writer.finalize()?;
        Ok(path)
    }
}

/// Always transcribes to the same text
pub struct FixedAsr(pub &'static str);

#[async_trait]
impl AsrEngine for FixedAsr {
    async fn transcribe(&self, _samples: &[f32]) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

// =============================================================================
// Contexts and message helpers
// =============================================================================

/// Context for a character named `name` with an in-memory history
pub fn context(
    name: &str,
    agent: Arc<dyn Agent>,
    tts: Arc<dyn TtsEngine>,
) -> (ServiceContext, Arc<InMemoryHistory>) {
    let history = Arc::new(InMemoryHistory::new());
    let character = CharacterProfile {
        conf_uid: name.to_lowercase(),
        name: name.to_string(),
        ..CharacterProfile::default()
    };
    let settings = ConversationSettings {
        playback_timeout_secs: 5,
        ..ConversationSettings::default()
    };
    let store: Arc<dyn HistoryStore> = history.clone();
    let context = ServiceContext::new(character, agent, tts)
        .with_history(store, Some("h1".to_string()))
        .with_settings(settings);
    (context, history)
}

pub fn client(id: &str) -> ClientId {
    ClientId::new(id)
}

/// Receive the next message, failing the test after two seconds
pub async fn next_message(rx: &mut mpsc::Receiver<String>) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("sink closed");
    serde_json::from_str(&text).expect("invalid JSON from the core")
}

/// Receive until a message of `kind` arrives, returning everything seen
pub async fn collect_until(rx: &mut mpsc::Receiver<String>, kind: &str) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        let message = next_message(rx).await;
        let done = message["type"] == kind;
        seen.push(message);
        if done {
            return seen;
        }
    }
}

/// Everything already queued on the receiver
pub fn drain_now(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut seen = Vec::new();
    while let Ok(text) = rx.try_recv() {
        seen.push(serde_json::from_str(&text).expect("invalid JSON from the core"));
    }
    seen
}

/// `control` message with the given signal?
pub fn is_control(message: &Value, signal: &str) -> bool {
    message["type"] == "control" && message["text"] == signal
}

/// Display texts of the audio payloads, in arrival order
pub fn audio_texts(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m["type"] == "audio")
        .map(|m| m["display_text"]["text"].as_str().unwrap_or_default().to_string())
        .collect()
}
