//! Chorus Core - Streaming Speech-Turn Orchestration
//!
//! This crate turns an agent's incrementally produced text into ordered,
//! spoken and displayed output, lets the user interrupt mid-utterance, and
//! coordinates turn-taking when several characters share one conversation.
//! It has no opinion about which LLM, speech engines or transport are used:
//! all of them plug in through narrow traits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Clients (JSON)                           │
//! └───────────────▲──────────────────────────────────┬───────────────┘
//!                 │ ServerMessage                    │ ClientMessage
//! ┌───────────────┴──────────────────────────────────▼───────────────┐
//! │                       ConversationRouter                         │
//! │   ChatGroupManager      ResponseCorrelator      ClientRegistry   │
//! │           │                                                      │
//! │   ┌───────▼──────────────────┐     ┌───────────────────────────┐ │
//! │   │ SingleConversation /     │     │ Agent ─► OutputPipeline   │ │
//! │   │ GroupConversation        ├────►│  divider ► actions ►      │ │
//! │   │  (ConversationTask)      │     │  display ► speech filter  │ │
//! │   └───────┬──────────────────┘     └───────────────────────────┘ │
//! │           ▼                                                      │
//! │   TtsTaskManager ── concurrent synthesis, ordered delivery       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chorus_core::{
//!     agent::BasicMemoryAgent, config::load_config,
//!     router::ConversationRouter, service::ServiceContext, transport::ChannelSink,
//! };
//!
//! let config = load_config()?;
//! let factory = move |_client: &chorus_core::transport::ClientId| {
//!     let pipeline = config.output_pipeline(None, None);
//!     let agent = BasicMemoryAgent::new(llm.clone(), pipeline, "You are Mao.");
//!     Ok(ServiceContext::new(config.character.clone(), Arc::new(agent), tts.clone())
//!         .with_settings(config.conversation.clone()))
//! };
//! let router = ConversationRouter::new(Arc::new(factory));
//!
//! let (sink, outbound) = ChannelSink::pair(64);
//! router.serve("client-1".into(), Arc::new(sink), inbound_json_stream).await?;
//! ```
//!
//! # Module Overview
//!
//! - [`text`]: tag-aware sentence divider, segmenters, speech filters
//! - [`pipeline`]: ordered output stages between the divider and speech
//! - [`output`]: what agents emit (sentences, audio, actions)
//! - [`audio`]: audio payloads and volume envelopes
//! - [`backend`]: LLM, ASR and TTS contracts
//! - [`agent`]: the agent contract and a memory-keeping agent
//! - [`conversation`]: single and group turns, TTS ordering, interrupts
//! - [`correlator`]: waiting for client replies
//! - [`router`]: per-client message dispatch
//! - [`history`]: chat history contract and in-memory store
//! - [`messages`]: wire messages
//! - [`transport`]: client sinks and broadcast
//! - [`service`]: dependency-injected per-client context
//! - [`config`]: TOML and environment configuration
//! - [`logging`]: subscriber setup for embedding programs
//! - [`error`]: conversation error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod audio;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod correlator;
pub mod error;
pub mod history;
pub mod logging;
pub mod messages;
pub mod output;
pub mod pipeline;
pub mod router;
pub mod service;
pub mod text;
pub mod transport;

// Re-exports for convenience
pub use agent::{Agent, AgentStream, BasicMemoryAgent, BatchInput};
pub use audio::{prepare_audio_payload, AudioError, AudioPayload};
pub use backend::{AsrEngine, LlmBackend, LlmRequest, StreamingToken, TtsEngine};
pub use conversation::{
    ChatGroupManager, ConversationTask, GroupConversation, GroupConversationState,
    InterruptHandle, SingleConversation, TtsTaskManager, TurnInput, TurnOutcome, TurnState,
};
pub use correlator::ResponseCorrelator;
pub use error::ConversationError;
pub use history::{HistoryMessage, HistoryRole, HistoryStore, InMemoryHistory};
pub use messages::{ClientMessage, ControlSignal, ServerMessage};
pub use output::{Actions, AgentOutput, AudioOutput, DisplayText, SentenceOutput};
pub use pipeline::{OutputPipeline, OutputStage};
pub use router::ConversationRouter;
pub use service::{CharacterProfile, ContextFactory, ConversationSettings, ServiceContext};
pub use text::{DividerConfig, SentenceDivider, SentenceWithTags, TagInfo, TagState};
pub use transport::{BroadcastResult, ChannelSink, ClientId, ClientRegistry, MessageSink};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ChorusConfig, ChorusToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
