//! Speech engine contracts

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Sample rate the core assumes for microphone audio
pub const ASR_SAMPLE_RATE: u32 = 16_000;

/// Speech-to-text engine
#[async_trait]
pub trait AsrEngine: Send + Sync {
    /// Transcribe mono f32 samples at [`ASR_SAMPLE_RATE`]
    async fn transcribe(&self, samples: &[f32]) -> anyhow::Result<String>;
}

/// Text-to-speech engine
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Synthesize `text` into a WAV file named after `file_stem`
    async fn generate_audio(&self, text: &str, file_stem: &str) -> anyhow::Result<PathBuf>;

    /// Delete a file produced by [`generate_audio`](Self::generate_audio)
    ///
    /// Failures are logged and otherwise ignored.
    async fn remove_file(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove audio file");
        }
    }
}
