//! Group Conversations
//!
//! Several clients' characters take turns answering one human input. Turns
//! are strictly sequential: one member speaks, its audio is played, and only
//! then does the next member get the transcript lines it has not seen yet.
//!
//! ```text
//!   conversation_history:  [Human: hi] [Mao: hello] [Shizuku: hey] ...
//!                                       ▲                          ▲
//!   memory_index[Shizuku] ──────────────┘                          │
//!   memory_index[Mao] ─────────────────────────────────────────────┘
//!
//!   turn_queue: Mao ─► Shizuku ─► Mao ─► ...   (pop front, push back)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::task::InterruptHandle;
use super::{
    await_playback, resolve_input, stream_to_speech, TtsTaskManager, TurnInput, TurnProgress, TurnState,
};
use crate::agent::BatchInput;
use crate::correlator::ResponseCorrelator;
use crate::error::{ConversationError, Result};
use crate::history::{HistoryRole, INTERRUPTED_NOTE};
use crate::messages::{ControlSignal, ImageAttachment, ServerMessage};
use crate::service::ServiceContext;
use crate::transport::{ClientId, ClientRegistry, TransportError};

/// Shared transcript and turn order of one group conversation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupConversationState {
    /// `"{speaker}: {text}"` lines in turn completion order
    pub conversation_history: Vec<String>,
    /// Per member, the first transcript line it has not been given yet
    pub memory_index: HashMap<ClientId, usize>,
    /// Speakers still to go, front first
    pub turn_queue: VecDeque<ClientId>,
}

impl GroupConversationState {
    /// State for `members` speaking in the given order
    pub fn new(members: impl IntoIterator<Item = ClientId>) -> Self {
        let turn_queue: VecDeque<ClientId> = members.into_iter().collect();
        let memory_index = turn_queue.iter().map(|id| (id.clone(), 0)).collect();
        Self {
            conversation_history: Vec::new(),
            memory_index,
            turn_queue,
        }
    }

    /// Record a transcript line
    pub fn append_line(&mut self, speaker: &str, text: &str) {
        self.conversation_history.push(format!("{speaker}: {text}"));
    }

    /// Take the next speaker off the queue
    pub fn next_speaker(&mut self) -> Option<ClientId> {
        self.turn_queue.pop_front()
    }

    /// Transcript lines `member` has not seen, joined by newlines
    #[must_use]
    pub fn new_context(&self, member: &ClientId) -> String {
        let start = self
            .memory_index
            .get(member)
            .copied()
            .unwrap_or(0)
            .min(self.conversation_history.len());
        self.conversation_history[start..].join("\n")
    }

    /// Close `member`'s turn: record its response, advance its cursor and
    /// send it to the back of the queue
    pub fn complete_turn(&mut self, member: ClientId, speaker: &str, response: &str) {
        if !response.trim().is_empty() {
            self.append_line(speaker, response);
        }
        self.memory_index
            .insert(member.clone(), self.conversation_history.len());
        self.turn_queue.push_back(member);
    }

    /// Put a member whose turn failed back in rotation
    ///
    /// Its cursor stays where it was so the next attempt sees the same lines.
    pub fn requeue(&mut self, member: ClientId) {
        self.turn_queue.push_back(member);
    }
}

/// One participant: a connected client and its character
#[derive(Clone)]
pub struct GroupMember {
    /// Client connection
    pub client: ClientId,
    /// The client's character and engines
    pub context: Arc<ServiceContext>,
}

impl GroupMember {
    /// Pair a client with its context
    pub fn new(client: ClientId, context: Arc<ServiceContext>) -> Self {
        Self { client, context }
    }

    fn name(&self) -> &str {
        &self.context.character.name
    }
}

/// How a group conversation ended
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupOutcome {
    /// Terminal state
    pub state: TurnState,
    /// Member turns taken, failed ones included
    pub turns: usize,
    /// Final transcript
    pub transcript: Vec<String>,
    /// Member whose turn was cut off by an interrupt
    pub interrupted_member: Option<ClientId>,
    /// What that member was heard saying
    pub heard: Option<String>,
    /// Failure description, for failed conversations
    pub error: Option<String>,
}

#[derive(Default)]
struct GroupProgress {
    turns: usize,
    active: Option<usize>,
    turn: TurnProgress,
}

/// Round-robin conversation among a group's characters
pub struct GroupConversation {
    members: Vec<GroupMember>,
    initiator: ClientId,
    registry: ClientRegistry,
    correlator: ResponseCorrelator,
    tts_manager: TtsTaskManager,
    state: Mutex<GroupConversationState>,
}

impl GroupConversation {
    /// Conversation started by `initiator`
    ///
    /// Members speak in the given order. TTS behavior follows the
    /// initiator's settings.
    pub fn new(
        members: Vec<GroupMember>,
        initiator: ClientId,
        registry: ClientRegistry,
        correlator: ResponseCorrelator,
    ) -> Self {
        let tts_manager = members
            .iter()
            .find(|m| m.client == initiator)
            .map(|m| m.context.settings.tts_manager())
            .unwrap_or_default();
        let state = GroupConversationState::new(members.iter().map(|m| m.client.clone()));
        Self {
            members,
            initiator,
            registry,
            correlator,
            tts_manager,
            state: Mutex::new(state),
        }
    }

    /// Snapshot of the transcript and turn order
    #[must_use]
    pub fn state(&self) -> GroupConversationState {
        self.state.lock().clone()
    }

    fn member_ids(&self) -> Vec<ClientId> {
        self.members.iter().map(|m| m.client.clone()).collect()
    }

    fn member_index(&self, client: &ClientId) -> Option<usize> {
        self.members.iter().position(|m| &m.client == client)
    }

    async fn broadcast(&self, message: &ServerMessage, exclude: Option<&ClientId>) {
        let result = self.registry.broadcast(&self.member_ids(), message, exclude).await;
        if !result.all_succeeded() {
            tracing::warn!(failed = result.failed, "Group broadcast partially failed");
        }
    }

    /// Run the conversation until the turn limit, an interrupt, or a full
    /// rotation of failed turns
    pub async fn process(
        &self,
        input: TurnInput,
        images: Vec<ImageAttachment>,
        interrupt: &InterruptHandle,
    ) -> GroupOutcome {
        tracing::info!(
            initiator = %self.initiator,
            members = self.members.len(),
            "Group conversation started"
        );
        let mut progress = GroupProgress::default();

        let result = tokio::select! {
            biased;
            () = interrupt.interrupted() => Err(ConversationError::Interrupted),
            result = self.run(input, images, &mut progress) => result,
        };

        let delivered = self.tts_manager.delivered_text().await;
        self.tts_manager.clear().await;

        let mut outcome = GroupOutcome {
            state: TurnState::Finalized,
            turns: progress.turns,
            ..GroupOutcome::default()
        };
        match result {
            Ok(()) => tracing::info!(turns = progress.turns, "Group conversation finished"),
            Err(ConversationError::Interrupted) => {
                let heard = interrupt.heard().unwrap_or(delivered);
                outcome.interrupted_member = progress
                    .active
                    .map(|i| self.members[i].client.clone());
                self.record_interrupt(progress.active, &heard).await;
                outcome.state = TurnState::Cancelled;
                outcome.heard = Some(heard);
            }
            Err(e) => {
                tracing::error!(error = %e, "Group conversation failed");
                self.broadcast(&ServerMessage::error(format!("Error in conversation: {e}")), None)
                    .await;
                outcome.state = TurnState::Failed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome.transcript = self.state.lock().conversation_history.clone();
        outcome
    }

    async fn run(
        &self,
        input: TurnInput,
        images: Vec<ImageAttachment>,
        progress: &mut GroupProgress,
    ) -> Result<()> {
        let initiator = self
            .member_index(&self.initiator)
            .map(|i| &self.members[i])
            .ok_or(ConversationError::Transport(TransportError::Closed))?;
        let initiator_sink = self
            .registry
            .get(&self.initiator)
            .ok_or(ConversationError::Transport(TransportError::Closed))?;
        let context = &initiator.context;
        let human_name = context.character.human_name.clone();

        let text = resolve_input(
            input,
            context.asr.as_ref(),
            initiator_sink.as_ref(),
            &mut progress.turn,
        )
        .await?;
        self.broadcast(
            &ServerMessage::UserInputTranscription { text: text.clone() },
            Some(&self.initiator),
        )
        .await;
        for member in &self.members {
            member.context.store_history(HistoryRole::Human, &text, None).await;
        }
        self.state.lock().append_line(&human_name, &text);

        let names: Vec<String> = self.members.iter().map(|m| m.name().to_string()).collect();
        for member in &self.members {
            member
                .context
                .agent
                .start_group_conversation(&human_name, &names)
                .await;
        }

        let max_turns = context.settings.max_group_turns;
        let mut failed_in_a_row = 0;
        loop {
            if max_turns.is_some_and(|max| progress.turns >= max) {
                tracing::info!(turns = progress.turns, "Group turn limit reached");
                break;
            }
            let Some(speaker) = self.state.lock().next_speaker() else {
                break;
            };
            let Some(index) = self.member_index(&speaker) else {
                continue;
            };
            progress.active = Some(index);
            progress.turn = TurnProgress::default();

            let result = self.member_turn(index, &images, &mut progress.turn).await;
            self.tts_manager.clear().await;
            progress.turns += 1;
            progress.active = None;

            let member = &self.members[index];
            match result {
                Ok(response) => {
                    failed_in_a_row = 0;
                    self.state
                        .lock()
                        .complete_turn(speaker, member.name(), &response);
                }
                Err(e) => {
                    tracing::error!(member = %speaker, error = %e, "Member turn failed");
                    self.broadcast(&ServerMessage::error(format!("Error in conversation: {e}")), None)
                        .await;
                    self.state.lock().requeue(speaker);
                    failed_in_a_row += 1;
                    if failed_in_a_row >= self.members.len() {
                        tracing::warn!("Every member failed in a full rotation, stopping");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// One member's turn; returns its full response
    async fn member_turn(
        &self,
        index: usize,
        images: &[ImageAttachment],
        progress: &mut TurnProgress,
    ) -> Result<String> {
        let member = &self.members[index];
        let context = &member.context;
        let sink = self
            .registry
            .get(&member.client)
            .ok_or(ConversationError::Transport(TransportError::Closed))?;
        tracing::info!(member = %member.client, name = member.name(), "Member turn started");

        progress.enter(TurnState::SignalStart);
        self.broadcast(&ServerMessage::control(ControlSignal::ConversationChainStart), None)
            .await;
        self.broadcast(&ServerMessage::full_text(context.settings.thinking_text.clone()), None)
            .await;

        progress.enter(TurnState::AwaitingAgentOutput);
        let new_context = self.state.lock().new_context(&member.client);
        let batch = BatchInput::text(new_context).with_images(images.to_vec());
        let stream = context.agent.chat(batch).await?;
        stream_to_speech(stream, &self.tts_manager, &context.tts, &sink, progress).await?;

        let response = progress.response.clone();
        if response.is_empty() {
            tracing::warn!(member = %member.client, "Member produced no reply");
        } else {
            for other in &self.members {
                other
                    .context
                    .store_history(HistoryRole::Ai, &response, Some(&context.character))
                    .await;
            }
        }

        await_playback(
            &self.tts_manager,
            &member.client,
            sink.as_ref(),
            &self.correlator,
            context.settings.playback_timeout(),
            progress,
        )
        .await?;

        self.broadcast(&ServerMessage::control(ControlSignal::ForceNewMessage), None)
            .await;
        self.broadcast(&ServerMessage::control(ControlSignal::ConversationChainEnd), None)
            .await;
        Ok(response)
    }

    async fn record_interrupt(&self, active: Option<usize>, heard: &str) {
        tracing::info!(active = ?active.map(|i| &self.members[i].client), "Group conversation interrupted");
        self.broadcast(&ServerMessage::conversation_interrupted(), None).await;

        for (i, member) in self.members.iter().enumerate() {
            if Some(i) == active {
                member.context.record_interrupt(heard).await;
                if !heard.trim().is_empty() {
                    self.state.lock().append_line(member.name(), heard);
                }
            } else {
                member
                    .context
                    .store_history(HistoryRole::System, INTERRUPTED_NOTE, None)
                    .await;
            }
        }
    }
}
