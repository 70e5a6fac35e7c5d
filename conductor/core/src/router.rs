//! Conversation Router
//!
//! Entry point for connected clients. Every inbound [`ClientMessage`] goes
//! through [`ConversationRouter::handle_message`], which starts or
//! interrupts turns, answers group and history requests, and feeds client
//! replies to the [`ResponseCorrelator`].
//!
//! # Architecture
//!
//! ```text
//!   client ──json──► serve ──► handle_message ─┬─► text-input / mic-audio-end / ai-speak-signal
//!                                              │     └─► ConversationTask (single or group)
//!                                              ├─► interrupt-signal ──► ConversationTask::interrupt
//!                                              ├─► frontend-playback-complete ──► correlator
//!                                              ├─► audio-play-start ──► forwarded payload to group
//!                                              ├─► group ops ──► ChatGroupManager ──► group-update
//!                                              └─► history ops ──► HistoryStore
//! ```
//!
//! One conversation task runs per client, or per group when the client is
//! grouped. A new trigger interrupts the running task before starting the
//! next one.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;

use crate::audio::AudioPayload;
use crate::conversation::{
    ChatGroupManager, ConversationTask, GroupConversation, GroupMember, SingleConversation,
    TurnInput, PLAYBACK_COMPLETE,
};
use crate::correlator::ResponseCorrelator;
use crate::history::{HistoryRole, HistoryStore};
use crate::messages::{ClientMessage, ControlSignal, ImageAttachment, ServerMessage};
use crate::output::DisplayText;
use crate::service::{ContextFactory, ServiceContext};
use crate::transport::{ClientId, ClientRegistry, MessageSink};

/// Status text sent when the character is asked to speak first
pub const AI_SPEAK_TEXT: &str = "AI wants to speak something...";

/// Per-client state
#[derive(Clone)]
struct ClientState {
    context: Arc<ServiceContext>,
    conversation: Arc<SingleConversation>,
    mic_buffer: Arc<Mutex<Vec<f32>>>,
}

/// Dispatches client messages to conversations
pub struct ConversationRouter {
    factory: Arc<dyn ContextFactory>,
    registry: ClientRegistry,
    correlator: ResponseCorrelator,
    groups: Mutex<ChatGroupManager>,
    clients: DashMap<ClientId, ClientState>,
    tasks: DashMap<String, Arc<ConversationTask>>,
}

impl ConversationRouter {
    /// Router creating each client's context through `factory`
    pub fn new(factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            factory,
            registry: ClientRegistry::new(),
            correlator: ResponseCorrelator::new(),
            groups: Mutex::new(ChatGroupManager::new()),
            clients: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    /// Connected clients' sinks
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Pending client replies
    #[must_use]
    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    /// Context of a connected client
    #[must_use]
    pub fn context(&self, client: &ClientId) -> Option<Arc<ServiceContext>> {
        self.clients.get(client).map(|s| Arc::clone(&s.context))
    }

    /// Members of the client's group (empty when ungrouped)
    #[must_use]
    pub fn group_members(&self, client: &ClientId) -> Vec<ClientId> {
        self.groups.lock().members_of(client)
    }

    /// Whether a conversation is running for the client (or its group)
    #[must_use]
    pub fn is_busy(&self, client: &ClientId) -> bool {
        self.tasks
            .get(&self.task_key(client))
            .is_some_and(|t| !t.is_finished())
    }

    fn task_key(&self, client: &ClientId) -> String {
        self.groups
            .lock()
            .group_of(client)
            .map_or_else(|| client.to_string(), |g| g.group_id.clone())
    }

    fn client_state(&self, client: &ClientId) -> Result<ClientState> {
        self.clients
            .get(client)
            .map(|s| s.clone())
            .with_context(|| format!("client {client} is not connected"))
    }

    async fn send(&self, client: &ClientId, message: &ServerMessage) {
        if let Err(e) = self.registry.send_to(client, message).await {
            tracing::warn!(client = %client, error = %e, "Failed to send message");
        }
    }

    // ============================================
    // Connection lifecycle
    // ============================================

    /// Register a new client and greet it
    ///
    /// # Errors
    ///
    /// Fails when the context factory cannot build a context.
    pub async fn connect(&self, client: ClientId, sink: Arc<dyn MessageSink>) -> Result<()> {
        let context = Arc::new(self.factory.create_context(&client)?);
        let conversation = Arc::new(SingleConversation::new(
            client.clone(),
            Arc::clone(&context),
            Arc::clone(&sink),
            self.correlator.clone(),
        ));
        self.registry.register(client.clone(), sink);
        self.clients.insert(
            client.clone(),
            ClientState {
                context,
                conversation,
                mic_buffer: Arc::new(Mutex::new(Vec::new())),
            },
        );
        self.groups.lock().register_client(client.clone());
        tracing::info!(client = %client, clients = self.registry.count(), "Client connected");

        let update = self.groups.lock().group_update(&client);
        self.send(&client, &update).await;
        self.send(&client, &ServerMessage::full_text("Connection established"))
            .await;
        self.send(&client, &ServerMessage::control(ControlSignal::StartMic))
            .await;
        Ok(())
    }

    /// Tear down a client: stop its conversation, release its waits and
    /// update its former group
    pub async fn disconnect(&self, client: &ClientId) {
        let key = self.task_key(client);
        if let Some((_, task)) = self.tasks.remove(&key) {
            task.interrupt(None).await;
        }

        let (former, remaining) = {
            let mut groups = self.groups.lock();
            let former = groups.members_of(client);
            let remaining = groups.remove_client(client);
            (former, remaining)
        };
        self.registry.unregister(client);
        self.clients.remove(client);
        self.correlator.cleanup(client);
        tracing::info!(client = %client, clients = self.registry.count(), "Client disconnected");

        let notice = ServerMessage::GroupOperationResult {
            success: true,
            message: format!("Member {client} disconnected"),
        };
        for member in former.iter().filter(|m| *m != client) {
            let update = self.groups.lock().group_update(member);
            self.send(member, &update).await;
            if remaining.contains(member) {
                self.send(member, &notice).await;
            }
        }
    }

    /// Feed a client's raw JSON messages until the stream ends, then
    /// disconnect it
    ///
    /// Malformed messages are answered with an error and skipped.
    pub async fn serve<S>(&self, client: ClientId, sink: Arc<dyn MessageSink>, inbound: S) -> Result<()>
    where
        S: Stream<Item = String> + Send,
    {
        self.connect(client.clone(), sink).await?;
        futures::pin_mut!(inbound);
        while let Some(text) = inbound.next().await {
            let message = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(client = %client, error = %e, "Unparseable client message");
                    self.send(&client, &ServerMessage::error(format!("Invalid message: {e}")))
                        .await;
                    continue;
                }
            };
            if let Err(e) = self.handle_message(&client, message).await {
                tracing::warn!(client = %client, error = %e, "Failed to handle client message");
            }
        }
        self.disconnect(&client).await;
        Ok(())
    }

    // ============================================
    // Dispatch
    // ============================================

    /// Handle one message from `client`
    ///
    /// # Errors
    ///
    /// Fails when the client is unknown or a history operation fails.
    pub async fn handle_message(&self, client: &ClientId, message: ClientMessage) -> Result<()> {
        tracing::debug!(client = %client, kind = message.kind(), "Client message");
        match message {
            ClientMessage::TextInput { text, images } => {
                self.start_conversation(client, TurnInput::Text(text), images)
                    .await
            }
            ClientMessage::MicAudioData { audio } => {
                self.client_state(client)?.mic_buffer.lock().extend(audio);
                Ok(())
            }
            ClientMessage::MicAudioEnd { images } => {
                let samples = std::mem::take(&mut *self.client_state(client)?.mic_buffer.lock());
                self.start_conversation(client, TurnInput::Audio(samples), images)
                    .await
            }
            ClientMessage::AiSpeakSignal => {
                self.send(client, &ServerMessage::full_text(AI_SPEAK_TEXT)).await;
                self.start_conversation(client, TurnInput::Text(String::new()), Vec::new())
                    .await
            }
            ClientMessage::InterruptSignal { text } => {
                let heard = Some(text).filter(|t| !t.is_empty());
                self.interrupt(client, heard).await;
                Ok(())
            }
            ClientMessage::FrontendPlaybackComplete => {
                let reply = serde_json::json!({ "type": PLAYBACK_COMPLETE });
                if !self.correlator.deliver(client, &reply) {
                    tracing::debug!(client = %client, "Playback ack with no waiting turn");
                }
                Ok(())
            }
            ClientMessage::AudioPlayStart { display_text } => {
                self.forward_playback(client, display_text).await;
                Ok(())
            }
            ClientMessage::AddClientToGroup { invitee_uid } => {
                self.add_to_group(client, &invitee_uid).await;
                Ok(())
            }
            ClientMessage::RemoveClientFromGroup { target_uid } => {
                self.remove_from_group(client, &target_uid).await;
                Ok(())
            }
            ClientMessage::RequestGroupInfo => {
                let update = self.groups.lock().group_update(client);
                self.send(client, &update).await;
                Ok(())
            }
            ClientMessage::FetchHistoryList => self.send_history_list(client).await,
            ClientMessage::FetchAndSetHistory { history_uid } => {
                self.fetch_and_set_history(client, &history_uid).await
            }
            ClientMessage::CreateNewHistory => self.create_history(client).await,
            ClientMessage::DeleteHistory { history_uid } => {
                self.delete_history(client, &history_uid).await
            }
        }
    }

    // ============================================
    // Conversations
    // ============================================

    async fn start_conversation(
        &self,
        client: &ClientId,
        input: TurnInput,
        images: Vec<ImageAttachment>,
    ) -> Result<()> {
        let state = self.client_state(client)?;
        let key = self.task_key(client);
        if let Some((_, running)) = self.tasks.remove(&key) {
            if !running.is_finished() {
                tracing::info!(client = %client, "New input while a turn is running, interrupting it");
            }
            running.interrupt(None).await;
        }

        let members = self.group_members(client);
        let task = if members.len() > 1 {
            let group: Vec<GroupMember> = members
                .iter()
                .filter_map(|id| {
                    self.clients
                        .get(id)
                        .map(|s| GroupMember::new(id.clone(), Arc::clone(&s.context)))
                })
                .collect();
            tracing::info!(client = %client, group = %key, members = group.len(), "Starting group conversation");
            let conversation = GroupConversation::new(
                group,
                client.clone(),
                self.registry.clone(),
                self.correlator.clone(),
            );
            ConversationTask::spawn_group(conversation, input, images)
        } else {
            ConversationTask::spawn_single(state.conversation, input, images)
        };
        self.tasks.insert(key, Arc::new(task));
        Ok(())
    }

    /// Interrupt the client's (or its group's) running conversation
    ///
    /// Returns once the interrupted turn has recorded what was heard. A
    /// second interrupt with nothing running has no effect.
    pub async fn interrupt(&self, client: &ClientId, heard: Option<String>) {
        let key = self.task_key(client);
        let Some((_, task)) = self.tasks.remove(&key) else {
            tracing::debug!(client = %client, "Interrupt with no running conversation");
            return;
        };
        if task.interrupt(heard).await.is_some() {
            tracing::info!(client = %client, "Conversation interrupted");
        }
    }

    /// Wait for the client's conversation to end on its own
    pub async fn wait_idle(&self, client: &ClientId) {
        let key = self.task_key(client);
        let task = self.tasks.get(&key).map(|t| t.value().clone());
        if let Some(task) = task {
            task.join().await;
        }
    }

    /// Show other group members the payload `client` started playing
    async fn forward_playback(&self, client: &ClientId, display_text: Option<DisplayText>) {
        let members = self.group_members(client);
        let Some(display_text) = display_text else {
            return;
        };
        if members.len() < 2 {
            return;
        }
        let payload = AudioPayload {
            forwarded: true,
            ..AudioPayload::silent(Some(display_text), None)
        };
        let result = self
            .registry
            .broadcast(&members, &ServerMessage::Audio(payload), Some(client))
            .await;
        tracing::debug!(client = %client, sent = result.successful, "Forwarded playback to group");
    }

    // ============================================
    // Groups
    // ============================================

    async fn add_to_group(&self, inviter: &ClientId, invitee: &ClientId) {
        let result = self.groups.lock().add_client_to_group(inviter, invitee);
        match result {
            Ok(members) => {
                self.send(
                    inviter,
                    &ServerMessage::GroupOperationResult {
                        success: true,
                        message: format!("Successfully added {invitee} to the group"),
                    },
                )
                .await;
                self.send_group_updates(&members).await;
            }
            Err(e) => {
                self.send(
                    inviter,
                    &ServerMessage::GroupOperationResult {
                        success: false,
                        message: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    async fn remove_from_group(&self, remover: &ClientId, target: &ClientId) {
        let result = self.groups.lock().remove_client_from_group(remover, target);
        match result {
            Ok(affected) => {
                self.send(
                    remover,
                    &ServerMessage::GroupOperationResult {
                        success: true,
                        message: format!("Successfully removed {target} from the group"),
                    },
                )
                .await;
                self.send_group_updates(&affected).await;
            }
            Err(e) => {
                self.send(
                    remover,
                    &ServerMessage::GroupOperationResult {
                        success: false,
                        message: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    async fn send_group_updates(&self, clients: &[ClientId]) {
        for client in clients {
            let update = self.groups.lock().group_update(client);
            self.send(client, &update).await;
        }
    }

    // ============================================
    // History
    // ============================================

    fn history_of(&self, client: &ClientId) -> Result<(Arc<ServiceContext>, Arc<dyn HistoryStore>)> {
        let context = self.client_state(client)?.context;
        let store = context
            .history
            .clone()
            .context("no history store configured")?;
        Ok((context, store))
    }

    async fn send_history_list(&self, client: &ClientId) -> Result<()> {
        let (context, store) = self.history_of(client)?;
        let histories = store.list_histories(&context.character.conf_uid).await?;
        self.send(client, &ServerMessage::HistoryList { histories }).await;
        Ok(())
    }

    async fn fetch_and_set_history(&self, client: &ClientId, history_uid: &str) -> Result<()> {
        let (context, store) = self.history_of(client)?;
        let conf_uid = &context.character.conf_uid;
        context.set_history_uid(Some(history_uid.to_string()));
        context
            .agent
            .set_memory_from_history(conf_uid, history_uid)
            .await?;

        let messages = store
            .get_history(conf_uid, history_uid)
            .await?
            .into_iter()
            .filter(|m| m.role != HistoryRole::System)
            .collect();
        self.send(client, &ServerMessage::HistoryData { messages }).await;
        Ok(())
    }

    async fn create_history(&self, client: &ClientId) -> Result<()> {
        let (context, store) = self.history_of(client)?;
        let conf_uid = &context.character.conf_uid;
        let history_uid = store.create_history(conf_uid).await?;
        context.set_history_uid(Some(history_uid.clone()));
        context
            .agent
            .set_memory_from_history(conf_uid, &history_uid)
            .await?;
        tracing::info!(client = %client, history_uid = %history_uid, "Created history");
        self.send(client, &ServerMessage::NewHistoryCreated { history_uid })
            .await;
        Ok(())
    }

    async fn delete_history(&self, client: &ClientId, history_uid: &str) -> Result<()> {
        let (context, store) = self.history_of(client)?;
        let success = store
            .delete_history(&context.character.conf_uid, history_uid)
            .await?;
        if success && context.history_uid().as_deref() == Some(history_uid) {
            context.set_history_uid(None);
        }
        self.send(
            client,
            &ServerMessage::HistoryDeleted {
                success,
                history_uid: history_uid.to_string(),
            },
        )
        .await;
        Ok(())
    }
}
