//! TTS Task Manager
//!
//! Synthesizes sentences concurrently and delivers their audio payloads in
//! the order the sentences were submitted.
//!
//! # Architecture
//!
//! ```text
//!   speak(s1) ──► task 1: [permit] synth ─► payload ─────────────► send ─► done₁
//!   speak(s2) ──► task 2: [permit] synth ─► payload ─► wait done₁ ─► send ─► done₂
//!   speak("") ──► no predecessor pending: send silent payload inline
//!                 otherwise:           step: wait done₂ ─► send silent ─► done₃
//! ```
//!
//! Each task holds the receiving end of its predecessor's completion signal,
//! so sends are serialized in submission order no matter which synthesis
//! finishes first. A semaphore bounds how many syntheses run at once. The
//! task list is behind a `tokio::sync::Mutex`; appending to it is the only
//! write shared between callers.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{prepare_audio_payload, AudioPayload, DEFAULT_SLICE_MS};
use crate::backend::TtsEngine;
use crate::messages::ServerMessage;
use crate::output::{Actions, AudioOutput, DisplayText};
use crate::transport::MessageSink;

/// Default bound on concurrent syntheses
pub const DEFAULT_MAX_CONCURRENT_SYNTHESIS: usize = 4;

/// Name for a temporary synthesis file: `YYYYmmdd_HHMMSS_<8 hex>`
#[must_use]
pub fn temp_file_stem() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"), &id[..8])
}

/// What a scheduled step produces before delivery
enum Job {
    /// Synthesize text, then delete the file
    Synthesize {
        text: String,
        tts: Arc<dyn TtsEngine>,
    },
    /// Audio that already exists (not deleted)
    Prepared(Option<PathBuf>),
}

struct TaskList {
    tasks: Vec<JoinHandle<()>>,
    tail: Option<oneshot::Receiver<()>>,
    cancel: CancellationToken,
    delivered: Arc<Mutex<Vec<String>>>,
    synthesis_tasks: usize,
}

impl TaskList {
    fn new() -> Self {
        Self {
            tasks: Vec::new(),
            tail: None,
            cancel: CancellationToken::new(),
            delivered: Arc::new(Mutex::new(Vec::new())),
            synthesis_tasks: 0,
        }
    }

    /// Whether every previously scheduled step has delivered
    fn predecessor_done(&mut self) -> bool {
        let done = match self.tail.as_mut() {
            None => true,
            Some(rx) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
        };
        if done {
            self.tail = None;
        }
        done
    }
}

/// Ordered, concurrent audio delivery for one conversation
pub struct TtsTaskManager {
    slice_ms: u32,
    permits: Arc<Semaphore>,
    list: tokio::sync::Mutex<TaskList>,
}

impl Default for TtsTaskManager {
    fn default() -> Self {
        Self::new(DEFAULT_SLICE_MS, DEFAULT_MAX_CONCURRENT_SYNTHESIS)
    }
}

impl TtsTaskManager {
    /// Create a manager
    #[must_use]
    pub fn new(slice_ms: u32, max_concurrent_synthesis: usize) -> Self {
        Self {
            slice_ms,
            permits: Arc::new(Semaphore::new(max_concurrent_synthesis.max(1))),
            list: tokio::sync::Mutex::new(TaskList::new()),
        }
    }

    /// Schedule one sentence
    ///
    /// Empty or whitespace-only text produces a silent payload and no
    /// synthesis task. Synthesis failures also produce a silent payload.
    pub async fn speak(
        &self,
        tts_text: &str,
        display_text: DisplayText,
        actions: Actions,
        tts: &Arc<dyn TtsEngine>,
        sink: &Arc<dyn MessageSink>,
    ) {
        let actions = Some(actions).filter(|a| !a.is_empty());
        let mut list = self.list.lock().await;

        if tts_text.trim().is_empty() {
            let payload = AudioPayload {
                slice_length: self.slice_ms,
                ..AudioPayload::silent(Some(display_text), actions)
            };
            if list.predecessor_done() {
                tracing::debug!("Sending silent payload");
                deliver(sink.as_ref(), payload, &list.delivered).await;
            } else {
                tracing::debug!("Queueing silent payload behind pending audio");
                self.schedule(&mut list, Job::Prepared(None), payload, Arc::clone(sink));
            }
            return;
        }

        list.synthesis_tasks += 1;
        let template = AudioPayload {
            slice_length: self.slice_ms,
            ..AudioPayload::silent(Some(display_text), actions)
        };
        let job = Job::Synthesize {
            text: tts_text.to_string(),
            tts: Arc::clone(tts),
        };
        self.schedule(&mut list, job, template, Arc::clone(sink));
    }

    /// Schedule pre-synthesized audio from the agent
    pub async fn forward_audio(&self, output: AudioOutput, sink: &Arc<dyn MessageSink>) {
        let mut list = self.list.lock().await;
        list.synthesis_tasks += 1;
        let template = AudioPayload {
            slice_length: self.slice_ms,
            ..AudioPayload::silent(
                Some(output.display_text),
                Some(output.actions).filter(|a| !a.is_empty()),
            )
        };
        self.schedule(
            &mut list,
            Job::Prepared(Some(output.audio_path)),
            template,
            Arc::clone(sink),
        );
    }

    fn schedule(
        &self,
        list: &mut TaskList,
        job: Job,
        template: AudioPayload,
        sink: Arc<dyn MessageSink>,
    ) {
        let (done_tx, done_rx) = oneshot::channel();
        let step = Step {
            job,
            template,
            prev: list.tail.replace(done_rx),
            done: done_tx,
            cancel: list.cancel.clone(),
            permits: Arc::clone(&self.permits),
            delivered: Arc::clone(&list.delivered),
            sink,
        };
        list.tasks.push(tokio::spawn(step.run()));
    }

    /// Await every scheduled step in submission order
    ///
    /// Returns how many steps were awaited.
    pub async fn drain(&self) -> usize {
        let tasks = std::mem::take(&mut self.list.lock().await.tasks);
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "TTS task ended abnormally");
            }
        }
        count
    }

    /// Number of synthesis (or audio forwarding) tasks scheduled this turn
    pub async fn synthesis_task_count(&self) -> usize {
        self.list.lock().await.synthesis_tasks
    }

    /// Display texts delivered so far this turn, joined by spaces
    pub async fn delivered_text(&self) -> String {
        let list = self.list.lock().await;
        let delivered = list.delivered.lock();
        delivered
            .iter()
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Reset for the next turn
    ///
    /// Steps still pending are cancelled: they skip delivery but still
    /// delete their synthesis files.
    pub async fn clear(&self) {
        let mut list = self.list.lock().await;
        list.cancel.cancel();
        let pending = list.tasks.iter().filter(|t| !t.is_finished()).count();
        if pending > 0 {
            tracing::debug!(pending, "Cancelling pending TTS tasks");
        }
        *list = TaskList::new();
    }
}

/// One scheduled delivery
struct Step {
    job: Job,
    template: AudioPayload,
    prev: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    delivered: Arc<Mutex<Vec<String>>>,
    sink: Arc<dyn MessageSink>,
}

impl Step {
    async fn run(self) {
        let Self {
            job,
            template,
            prev,
            done,
            cancel,
            permits,
            delivered,
            sink,
        } = self;

        let (path, cleanup) = match job {
            Job::Prepared(path) => (path, None),
            Job::Synthesize { text, tts } => {
                let stem = temp_file_stem();
                let _permit = permits.acquire().await.ok();
                // Runs to completion even when cancelled so the file is removed
                let generated = tts.generate_audio(&text, &stem).await;
                match generated {
                    Ok(path) => (Some(path.clone()), Some((tts, path))),
                    Err(e) => {
                        tracing::warn!(error = %e, text = %text, "Synthesis failed, sending silent payload");
                        (None, None)
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            let _ = done.send(());
            if let Some((tts, path)) = cleanup {
                tts.remove_file(&path).await;
            }
            return;
        }

        let payload = match prepare_audio_payload(
            path.as_deref(),
            template.slice_length,
            template.display_text.clone(),
            template.actions.clone(),
            false,
        )
        .await
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Audio payload preparation failed, sending silent payload");
                template
            }
        };

        let my_turn = match prev {
            None => !cancel.is_cancelled(),
            Some(prev) => tokio::select! {
                biased;
                () = cancel.cancelled() => false,
                _ = prev => true,
            },
        };
        if my_turn {
            deliver(sink.as_ref(), payload, &delivered).await;
        }
        let _ = done.send(());

        if let Some((tts, path)) = cleanup {
            tts.remove_file(&path).await;
        }
    }
}

async fn deliver(sink: &dyn MessageSink, payload: AudioPayload, delivered: &Mutex<Vec<String>>) {
    let text = payload.display_text.as_ref().map(|d| d.text.clone());
    let has_audio = payload.has_audio();
    match sink.send(&ServerMessage::Audio(payload)).await {
        Ok(()) => {
            tracing::debug!(has_audio, "Audio payload sent");
            if let Some(text) = text {
                delivered.lock().push(text);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to send audio payload"),
    }
}
