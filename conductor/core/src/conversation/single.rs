//! Single-party conversation turns.

use std::sync::Arc;

use super::task::InterruptHandle;
use super::{
    await_playback, resolve_input, send_end_signals, send_start_signals, stream_to_speech,
    TtsTaskManager, TurnInput, TurnProgress, TurnState,
};
use crate::agent::BatchInput;
use crate::correlator::ResponseCorrelator;
use crate::error::{ConversationError, Result};
use crate::history::HistoryRole;
use crate::messages::{ImageAttachment, ServerMessage};
use crate::service::ServiceContext;
use crate::transport::{ClientId, MessageSink};

/// How a turn ended
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Terminal state
    pub state: TurnState,
    /// User text, after transcription
    pub input: Option<String>,
    /// Full response text produced before the turn ended
    pub response: String,
    /// What the user heard, for cancelled turns
    pub heard: Option<String>,
    /// Failure description, for failed turns
    pub error: Option<String>,
}

/// Turn runner for one client and its character
pub struct SingleConversation {
    client: ClientId,
    context: Arc<ServiceContext>,
    sink: Arc<dyn MessageSink>,
    correlator: ResponseCorrelator,
    tts_manager: TtsTaskManager,
}

impl SingleConversation {
    /// Create a runner; TTS behavior comes from the context's settings
    pub fn new(
        client: ClientId,
        context: Arc<ServiceContext>,
        sink: Arc<dyn MessageSink>,
        correlator: ResponseCorrelator,
    ) -> Self {
        let tts_manager = context.settings.tts_manager();
        Self {
            client,
            context,
            sink,
            correlator,
            tts_manager,
        }
    }

    /// Client this runner speaks to
    #[must_use]
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Run one turn to a terminal state
    ///
    /// Never returns an error: failures are reported to the client (when
    /// client-visible) and described in the outcome. An interrupt stops the
    /// turn at its next suspension point and records the heard text with
    /// the agent and the history before this returns.
    pub async fn process(
        &self,
        input: TurnInput,
        images: Vec<ImageAttachment>,
        interrupt: &InterruptHandle,
    ) -> TurnOutcome {
        tracing::info!(client = %self.client, audio = input.is_audio(), "Turn started");
        let mut progress = TurnProgress::default();

        let result = tokio::select! {
            biased;
            () = interrupt.interrupted() => Err(ConversationError::Interrupted),
            result = self.run(input, images, &mut progress) => result,
        };

        let delivered = self.tts_manager.delivered_text().await;
        self.tts_manager.clear().await;

        let mut outcome = TurnOutcome {
            state: TurnState::Finalized,
            input: progress.input,
            response: progress.response,
            heard: None,
            error: None,
        };
        match result {
            Ok(()) => {
                tracing::info!(client = %self.client, chars = outcome.response.chars().count(), "Turn finished");
            }
            Err(ConversationError::Interrupted) => {
                let heard = interrupt.heard().unwrap_or(delivered);
                tracing::info!(client = %self.client, heard_len = heard.len(), "Turn interrupted");
                self.context.record_interrupt(&heard).await;
                outcome.state = TurnState::Cancelled;
                outcome.heard = Some(heard);
            }
            Err(e) => {
                if e.is_client_visible() {
                    tracing::error!(client = %self.client, error = %e, "Turn failed");
                    let report = ServerMessage::error(format!("Conversation error: {e}"));
                    if let Err(send_err) = self.sink.send(&report).await {
                        tracing::warn!(client = %self.client, error = %send_err, "Failed to report turn error");
                    }
                } else {
                    tracing::warn!(client = %self.client, error = %e, "Turn aborted");
                }
                outcome.state = TurnState::Failed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    async fn run(
        &self,
        input: TurnInput,
        images: Vec<ImageAttachment>,
        progress: &mut TurnProgress,
    ) -> Result<()> {
        let context = &self.context;

        progress.enter(TurnState::SignalStart);
        send_start_signals(self.sink.as_ref(), &context.settings.thinking_text).await?;

        let text = resolve_input(input, context.asr.as_ref(), self.sink.as_ref(), progress).await?;
        if !text.trim().is_empty() {
            context.store_history(HistoryRole::Human, &text, None).await;
        }

        progress.enter(TurnState::AwaitingAgentOutput);
        let batch = BatchInput::from_speaker(context.character.human_name.clone(), text).with_images(images);
        let stream = context.agent.chat(batch).await?;
        stream_to_speech(stream, &self.tts_manager, &context.tts, &self.sink, progress).await?;

        if progress.response.is_empty() {
            tracing::warn!(client = %self.client, "Agent produced no reply");
        } else {
            context
                .store_history(HistoryRole::Ai, &progress.response, Some(&context.character))
                .await;
        }

        await_playback(
            &self.tts_manager,
            &self.client,
            self.sink.as_ref(),
            &self.correlator,
            context.settings.playback_timeout(),
            progress,
        )
        .await?;

        send_end_signals(self.sink.as_ref()).await?;
        Ok(())
    }
}
