//! Collaborator Contracts
//!
//! The core consumes three kinds of external engines through narrow traits:
//!
//! - [`LlmBackend`]: streams tokens for a conversation
//! - [`AsrEngine`]: turns microphone samples into text
//! - [`TtsEngine`]: turns a sentence into a WAV file
//!
//! Provider-specific implementations live outside this crate and are
//! injected through [`ServiceContext`](crate::service::ServiceContext).
//!
//! # Usage
//!
//! ```ignore
//! use chorus_core::backend::{token_stream, ChatMessage, LlmBackend, LlmRequest};
//!
//! let request = LlmRequest::new(vec![ChatMessage::user("Hello!")]);
//! let tokens = token_stream(backend.send_streaming(&request).await?);
//! ```

mod llm;
mod speech;

pub use llm::{token_stream, ChatMessage, ChatRole, LlmBackend, LlmRequest, StreamingToken};
pub use speech::{AsrEngine, TtsEngine, ASR_SAMPLE_RATE};
