//! Conversation Turns
//!
//! A turn takes one user input through the agent and out to the client as
//! ordered audio payloads, then waits for the client to finish playing it.
//!
//! # Architecture
//!
//! ```text
//!   TurnInput ─► [SignalStart] ─► [Transcribing] ─► [AwaitingAgentOutput]
//!                                                          │
//!                                                          ▼
//!        [Finalized] ◄── [AwaitingPlaybackAck] ◄── [StreamingOutput] ──► TtsTaskManager ─► sink
//!
//!   any non-terminal state ──interrupt──► [Cancelled]   (heard text recorded)
//!   transcription / agent failure ──────► [Failed]      ({"type":"error"} sent)
//! ```
//!
//! - [`single`]: one client talking to its character
//! - [`group`]: round-robin turns among several clients' characters
//! - [`groups`]: who is grouped with whom
//! - [`task`]: running a turn on its own task with an interrupt handle
//! - [`tts_manager`]: ordered, concurrent audio delivery

pub mod group;
pub mod groups;
pub mod single;
pub mod task;
pub mod tts_manager;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::agent::AgentStream;
use crate::backend::{AsrEngine, TtsEngine};
use crate::correlator::ResponseCorrelator;
use crate::error::{ConversationError, Result};
use crate::messages::{ControlSignal, ServerMessage};
use crate::output::AgentOutput;
use crate::transport::{ClientId, MessageSink};

pub use group::{GroupConversation, GroupConversationState, GroupMember, GroupOutcome};
pub use groups::{ChatGroup, ChatGroupManager, GroupError};
pub use single::{SingleConversation, TurnOutcome};
pub use task::{ConversationOutcome, ConversationTask, InterruptHandle};
pub use tts_manager::TtsTaskManager;

/// Message type the client sends when it has played every payload
pub const PLAYBACK_COMPLETE: &str = "frontend-playback-complete";

/// What started the turn
#[derive(Clone, Debug, PartialEq)]
pub enum TurnInput {
    /// Typed text
    Text(String),
    /// Microphone samples at [`ASR_SAMPLE_RATE`](crate::backend::ASR_SAMPLE_RATE)
    Audio(Vec<f32>),
}

impl TurnInput {
    /// Whether the input needs transcription
    #[must_use]
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

/// Where a turn is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Not started
    #[default]
    Idle,
    /// Start signals being sent
    SignalStart,
    /// Audio input being transcribed
    Transcribing,
    /// Waiting for the agent's stream
    AwaitingAgentOutput,
    /// Routing agent output to speech
    StreamingOutput,
    /// Waiting for the client to finish playback
    AwaitingPlaybackAck,
    /// Completed normally
    Finalized,
    /// Stopped by an interrupt
    Cancelled,
    /// Aborted by a failure
    Failed,
}

impl TurnState {
    /// Whether the turn has ended
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled | Self::Failed)
    }
}

/// Mutable record of a turn in flight
#[derive(Debug, Default)]
pub(crate) struct TurnProgress {
    pub state: TurnState,
    pub input: Option<String>,
    pub response: String,
}

impl TurnProgress {
    fn enter(&mut self, state: TurnState) {
        tracing::debug!(from = ?self.state, to = ?state, "Turn state");
        self.state = state;
    }
}

// ============================================
// Turn steps shared by single and group turns
// ============================================

pub(crate) async fn send_start_signals(sink: &dyn MessageSink, thinking_text: &str) -> Result<()> {
    sink.send(&ServerMessage::control(ControlSignal::ConversationChainStart))
        .await?;
    sink.send(&ServerMessage::full_text(thinking_text)).await?;
    Ok(())
}

pub(crate) async fn send_end_signals(sink: &dyn MessageSink) -> Result<()> {
    sink.send(&ServerMessage::control(ControlSignal::ForceNewMessage))
        .await?;
    sink.send(&ServerMessage::control(ControlSignal::ConversationChainEnd))
        .await?;
    Ok(())
}

/// Turn the input into text, echoing transcriptions back to the speaker
pub(crate) async fn resolve_input(
    input: TurnInput,
    asr: Option<&Arc<dyn AsrEngine>>,
    sink: &dyn MessageSink,
    progress: &mut TurnProgress,
) -> Result<String> {
    let text = match input {
        TurnInput::Text(text) => text,
        TurnInput::Audio(samples) => {
            progress.enter(TurnState::Transcribing);
            let asr = asr.ok_or_else(|| ConversationError::transcription("no speech recognizer configured"))?;
            let text = asr
                .transcribe(&samples)
                .await
                .map_err(ConversationError::transcription)?;
            tracing::info!(samples = samples.len(), chars = text.chars().count(), "Transcribed user audio");
            sink.send(&ServerMessage::UserInputTranscription { text: text.clone() })
                .await?;
            text
        }
    };
    progress.input = Some(text.clone());
    Ok(text)
}

/// Route every agent output into the TTS manager, accumulating the response
pub(crate) async fn stream_to_speech(
    mut stream: AgentStream,
    tts_manager: &TtsTaskManager,
    tts: &Arc<dyn TtsEngine>,
    sink: &Arc<dyn MessageSink>,
    progress: &mut TurnProgress,
) -> Result<()> {
    progress.enter(TurnState::StreamingOutput);
    while let Some(output) = stream.next().await {
        let output = output?;
        append_response(&mut progress.response, output.response_text());
        match output {
            AgentOutput::Sentence(sentence) => {
                tts_manager
                    .speak(
                        &sentence.tts_text,
                        sentence.display_text,
                        sentence.actions,
                        tts,
                        sink,
                    )
                    .await;
            }
            AgentOutput::Audio(audio) => tts_manager.forward_audio(audio, sink).await,
        }
    }
    Ok(())
}

/// Join response parts with single spaces
fn append_response(response: &mut String, part: &str) {
    let part = part.trim();
    if part.is_empty() {
        return;
    }
    if !response.is_empty() {
        response.push(' ');
    }
    response.push_str(part);
}

/// Drain synthesis, then wait for the client's playback acknowledgement
///
/// The wait is registered before `backend-synth-complete` goes out so a
/// fast client cannot answer before anyone listens. Returns whether an
/// acknowledgement was awaited.
pub(crate) async fn await_playback(
    tts_manager: &TtsTaskManager,
    client: &ClientId,
    sink: &dyn MessageSink,
    correlator: &ResponseCorrelator,
    timeout: Duration,
    progress: &mut TurnProgress,
) -> Result<bool> {
    progress.enter(TurnState::AwaitingPlaybackAck);
    let steps = tts_manager.drain().await;
    if tts_manager.synthesis_task_count().await == 0 {
        tracing::debug!(client = %client, steps, "Nothing synthesized, not waiting for playback");
        return Ok(false);
    }

    let pending = correlator.register(client, PLAYBACK_COMPLETE);
    sink.send(&ServerMessage::BackendSynthComplete).await?;
    if pending.wait(Some(timeout)).await.is_some() {
        tracing::debug!(client = %client, "Playback acknowledged");
    }
    Ok(true)
}
