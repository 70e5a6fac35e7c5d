//! Memory-keeping agent over an [`LlmBackend`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;

use super::{Agent, AgentStream, BatchInput};
use crate::backend::{token_stream, ChatMessage, ChatRole, LlmBackend, LlmRequest};
use crate::error::ConversationError;
use crate::history::{HistoryRole, HistoryStore, INTERRUPTED_NOTE};
use crate::output::AgentOutput;
use crate::pipeline::OutputPipeline;

/// Agent that keeps the chat so far and sends it with every request
///
/// Tokens go through an [`OutputPipeline`] so callers get sentences. The
/// assistant message is added to memory once the stream is fully consumed;
/// an interrupted turn instead records only what was heard.
pub struct BasicMemoryAgent {
    backend: Arc<dyn LlmBackend>,
    pipeline: OutputPipeline,
    system: String,
    model: String,
    group_note: Mutex<Option<String>>,
    memory: Arc<Mutex<Vec<ChatMessage>>>,
    interrupted: Arc<AtomicBool>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl BasicMemoryAgent {
    /// Create an agent with a system prompt
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        pipeline: OutputPipeline,
        system: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            pipeline,
            system: system.into(),
            model: String::new(),
            group_note: Mutex::new(None),
            memory: Arc::new(Mutex::new(Vec::new())),
            interrupted: Arc::new(AtomicBool::new(false)),
            history: None,
        }
    }

    /// Model identifier passed to the backend
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// History store used by `set_memory_from_history`
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Snapshot of the memory
    #[must_use]
    pub fn memory(&self) -> Vec<ChatMessage> {
        self.memory.lock().clone()
    }

    /// Forget everything
    pub fn clear_memory(&self) {
        self.memory.lock().clear();
    }

    fn system_prompt(&self) -> String {
        match self.group_note.lock().as_deref() {
            Some(note) => format!("{}\n\n{note}", self.system),
            None => self.system.clone(),
        }
    }
}

#[async_trait]
impl Agent for BasicMemoryAgent {
    async fn chat(&self, input: BatchInput) -> Result<AgentStream, ConversationError> {
        self.interrupted.store(false, Ordering::SeqCst);

        let request = {
            let mut memory = self.memory.lock();
            memory.push(ChatMessage::user(input.prompt()));
            LlmRequest::new(memory.clone())
                .with_model(self.model.clone())
                .with_system(self.system_prompt())
        };

        tracing::debug!(
            backend = self.backend.name(),
            messages = request.messages.len(),
            "Sending chat request"
        );
        let rx = self
            .backend
            .send_streaming(&request)
            .await
            .map_err(|e| ConversationError::agent(e.to_string()))?;

        let collected = Arc::new(Mutex::new(String::new()));
        let tokens = {
            let collected = Arc::clone(&collected);
            token_stream(rx)
                .map_err(|e| ConversationError::agent(e.to_string()))
                .inspect_ok(move |token| collected.lock().push_str(token))
        };

        let memory = Arc::clone(&self.memory);
        let interrupted = Arc::clone(&self.interrupted);
        let remember = stream::once(async move {
            let response = std::mem::take(&mut *collected.lock());
            if !response.is_empty() && !interrupted.load(Ordering::SeqCst) {
                memory.lock().push(ChatMessage::assistant(response));
            }
        })
        .filter_map(|()| future::ready(None));

        Ok(self
            .pipeline
            .run(tokens)
            .map_ok(AgentOutput::Sentence)
            .chain(remember)
            .boxed())
    }

    async fn handle_interrupt(&self, heard: &str) {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            tracing::debug!("Interrupt already handled");
            return;
        }

        let mut memory = self.memory.lock();
        let last_is_assistant = memory
            .last()
            .is_some_and(|last| last.role == ChatRole::Assistant);
        if last_is_assistant {
            if let Some(last) = memory.last_mut() {
                last.content = format!("{heard}...");
            }
        } else if !heard.is_empty() {
            memory.push(ChatMessage::assistant(format!("{heard}...")));
        }
        memory.push(ChatMessage::system(INTERRUPTED_NOTE));
        tracing::info!(heard_len = heard.len(), "Agent memory updated after interrupt");
    }

    async fn set_memory_from_history(
        &self,
        conf_uid: &str,
        history_uid: &str,
    ) -> Result<(), ConversationError> {
        let store = self
            .history
            .as_ref()
            .ok_or_else(|| ConversationError::History("no history store configured".into()))?;
        let messages = store
            .get_history(conf_uid, history_uid)
            .await
            .map_err(|e| ConversationError::History(e.to_string()))?;

        let restored: Vec<ChatMessage> = messages
            .into_iter()
            .filter_map(|m| match m.role {
                HistoryRole::Human => Some(ChatMessage::user(m.content)),
                HistoryRole::Ai => Some(ChatMessage::assistant(m.content)),
                HistoryRole::System => None,
            })
            .collect();
        tracing::info!(history_uid, messages = restored.len(), "Memory restored from history");
        *self.memory.lock() = restored;
        Ok(())
    }

    async fn start_group_conversation(&self, human_name: &str, ai_participants: &[String]) {
        let note = format!(
            "You are in a group conversation with {human_name} and {}. \
             Lines are prefixed with the speaker's name. Reply only as yourself.",
            ai_participants.join(", ")
        );
        *self.group_note.lock() = Some(note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StreamingToken;
    use crate::history::{HistoryMessage, InMemoryHistory};
    use crate::text::DividerConfig;
    use tokio::sync::mpsc;

    /// Replies with fixed tokens and records every request
    struct Scripted {
        tokens: Vec<&'static str>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn send_streaming(
            &self,
            request: &LlmRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            self.requests.lock().push(request.clone());
            let (tx, rx) = mpsc::channel(self.tokens.len() + 1);
            for token in &self.tokens {
                tx.send(StreamingToken::Token((*token).to_string())).await?;
            }
            tx.send(StreamingToken::Complete {
                message: self.tokens.concat(),
            })
            .await?;
            Ok(rx)
        }
    }

    fn agent(tokens: Vec<&'static str>) -> (BasicMemoryAgent, Arc<Scripted>) {
        let backend = Arc::new(Scripted {
            tokens,
            requests: Mutex::new(Vec::new()),
        });
        let pipeline = OutputPipeline::builder(DividerConfig::default()).build();
        let agent = BasicMemoryAgent::new(backend.clone(), pipeline, "You are Mao.");
        (agent, backend)
    }

    #[tokio::test]
    async fn test_chat_remembers_full_response() {
        let (agent, backend) = agent(vec!["Hi", " there", ". ", "Nice day."]);
        let outputs: Vec<AgentOutput> = agent
            .chat(BatchInput::text("hello"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let texts: Vec<&str> = outputs.iter().map(AgentOutput::response_text).collect();
        assert_eq!(texts, vec!["Hi there.", "Nice day."]);
        assert_eq!(
            agent.memory(),
            vec![
                ChatMessage::user("hello"),
                ChatMessage::assistant("Hi there. Nice day.")
            ]
        );
        assert_eq!(backend.requests.lock()[0].system.as_deref(), Some("You are Mao."));
    }

    #[tokio::test]
    async fn test_interrupt_records_heard_text_once() {
        let (agent, _) = agent(vec!["Hello", " world", ". ", "More text here."]);
        let mut stream = agent.chat(BatchInput::text("hi")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.response_text(), "Hello world.");
        drop(stream);

        agent.handle_interrupt("Hello wor").await;
        agent.handle_interrupt("Hello world. More").await;

        assert_eq!(
            agent.memory(),
            vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("Hello wor..."),
                ChatMessage::system(INTERRUPTED_NOTE),
            ]
        );
    }

    #[tokio::test]
    async fn test_interrupt_with_nothing_heard() {
        let (agent, _) = agent(vec!["Hi."]);
        drop(agent.chat(BatchInput::text("hi")).await.unwrap());
        agent.handle_interrupt("").await;
        assert_eq!(
            agent.memory(),
            vec![ChatMessage::user("hi"), ChatMessage::system(INTERRUPTED_NOTE)]
        );
    }

    #[tokio::test]
    async fn test_set_memory_from_history_skips_system_entries() {
        let store = Arc::new(InMemoryHistory::new());
        let uid = store.create_history("mao").await.unwrap();
        for (role, text) in [
            (HistoryRole::Human, "hi"),
            (HistoryRole::Ai, "hello"),
            (HistoryRole::System, INTERRUPTED_NOTE),
        ] {
            store
                .store_message("mao", &uid, HistoryMessage::new(role, text))
                .await
                .unwrap();
        }

        let (agent, _) = agent(vec![]);
        let agent = agent.with_history(store);
        agent.set_memory_from_history("mao", &uid).await.unwrap();
        assert_eq!(
            agent.memory(),
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]
        );
    }

    #[tokio::test]
    async fn test_set_memory_without_store_fails() {
        let (agent, _) = agent(vec![]);
        let result = agent.set_memory_from_history("mao", "x").await;
        assert!(matches!(result, Err(ConversationError::History(_))));
    }

    #[tokio::test]
    async fn test_group_note_extends_system_prompt() {
        let (agent, backend) = agent(vec!["Ok."]);
        agent
            .start_group_conversation("Human", &["Mao".to_string(), "Shizuku".to_string()])
            .await;
        let _ = agent
            .chat(BatchInput::text("hi"))
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;

        let system = backend.requests.lock()[0].system.clone().unwrap();
        assert!(system.starts_with("You are Mao.\n\n"));
        assert!(system.contains("Mao, Shizuku"));
    }
}
