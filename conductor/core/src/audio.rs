//! Audio Payloads
//!
//! Turns a synthesized WAV file into the `audio` wire message: base64 audio
//! plus a normalized volume envelope the client uses for lip sync.
//!
//! ```text
//!   file.wav ─► tokio::fs::read ─► hound (in memory) ─► RMS per slice ─► / max ─► volumes
//!                     └──────────────────────────────► base64 ──────────────────► audio
//! ```

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::output::{Actions, DisplayText};

/// Default envelope slice length in milliseconds
pub const DEFAULT_SLICE_MS: u32 = 20;

/// Failure preparing an audio payload
#[derive(Debug, Error)]
pub enum AudioError {
    /// The file could not be read
    #[error("failed to read audio file: {0}")]
    Read(#[from] std::io::Error),

    /// The bytes are not a readable WAV stream
    #[error("failed to decode audio: {0}")]
    Decode(#[from] hound::Error),

    /// Every slice has zero volume
    #[error("audio is silent")]
    Silent,
}

/// Body of the `audio` message
///
/// `audio: None` is a silent payload: the client shows the text and
/// actions without playing anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    /// Base64-encoded WAV bytes
    pub audio: Option<String>,
    /// Normalized RMS volume per slice, in `[0, 1]`
    pub volumes: Vec<f32>,
    /// Slice length in milliseconds
    pub slice_length: u32,
    /// Text to show while the clip plays
    pub display_text: Option<DisplayText>,
    /// Avatar actions for this clip
    pub actions: Option<Actions>,
    /// Whether this payload was relayed from another group member
    pub forwarded: bool,
}

impl AudioPayload {
    /// Payload with no audio
    #[must_use]
    pub fn silent(display_text: Option<DisplayText>, actions: Option<Actions>) -> Self {
        Self {
            audio: None,
            volumes: Vec::new(),
            slice_length: DEFAULT_SLICE_MS,
            display_text,
            actions,
            forwarded: false,
        }
    }

    /// Whether this payload carries audio
    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Mark as relayed from another member
    #[must_use]
    pub fn forwarded(mut self) -> Self {
        self.forwarded = true;
        self
    }
}

/// Build an audio payload from a WAV file
///
/// With `path: None` the payload is silent. Empty actions are sent as
/// absent.
pub async fn prepare_audio_payload(
    path: Option<&Path>,
    slice_ms: u32,
    display_text: Option<DisplayText>,
    actions: Option<Actions>,
    forwarded: bool,
) -> Result<AudioPayload, AudioError> {
    let actions = actions.filter(|a| !a.is_empty());
    let Some(path) = path else {
        return Ok(AudioPayload {
            slice_length: slice_ms,
            forwarded,
            ..AudioPayload::silent(display_text, actions)
        });
    };

    let bytes = tokio::fs::read(path).await?;
    let volumes = volume_envelope(&bytes, slice_ms)?;
    tracing::debug!(
        path = %path.display(),
        bytes = bytes.len(),
        slices = volumes.len(),
        "Audio payload prepared"
    );

    Ok(AudioPayload {
        audio: Some(STANDARD.encode(&bytes)),
        volumes,
        slice_length: slice_ms,
        display_text,
        actions,
        forwarded,
    })
}

/// Normalized RMS per slice of an in-memory WAV stream
pub fn volume_envelope(wav: &[u8], slice_ms: u32) -> Result<Vec<f32>, AudioError> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
    };

    let per_slice = (spec.sample_rate as usize * slice_ms.max(1) as usize / 1000).max(1)
        * usize::from(spec.channels.max(1));

    let rms: Vec<f32> = samples
        .chunks(per_slice)
        .map(|chunk| (chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32).sqrt())
        .collect();

    let max = rms.iter().copied().fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return Err(AudioError::Silent);
    }
    Ok(rms.into_iter().map(|v| v / max).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer.write_sample(*s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_envelope_is_normalized_per_slice() {
        // 1 kHz, 20 ms slices = 20 samples each
        let mut samples = vec![1000_i16; 20];
        samples.extend(vec![4000_i16; 20]);
        samples.extend(vec![0_i16; 10]);

        let volumes = volume_envelope(&wav_bytes(&samples, 1000), 20).unwrap();
        assert_eq!(volumes.len(), 3);
        assert!((volumes[0] - 0.25).abs() < 1e-4);
        assert!((volumes[1] - 1.0).abs() < 1e-6);
        assert_eq!(volumes[2], 0.0);
    }

    #[test]
    fn test_all_zero_audio_is_an_error() {
        let result = volume_envelope(&wav_bytes(&[0; 100], 1000), 20);
        assert!(matches!(result, Err(AudioError::Silent)));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let result = volume_envelope(b"not a wav file", 20);
        assert!(matches!(result, Err(AudioError::Decode(_))));
    }

    #[tokio::test]
    async fn test_prepare_payload_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bytes = wav_bytes(&[500; 40], 1000);
        file.write_all(&bytes).unwrap();

        let payload = prepare_audio_payload(
            Some(file.path()),
            20,
            Some(DisplayText::new("Hi.")),
            Some(Actions::default()),
            false,
        )
        .await
        .unwrap();

        assert_eq!(payload.audio.as_deref(), Some(STANDARD.encode(&bytes).as_str()));
        assert_eq!(payload.volumes, vec![1.0, 1.0]);
        assert_eq!(payload.actions, None, "empty actions are dropped");
    }

    #[tokio::test]
    async fn test_prepare_without_path_is_silent() {
        let payload = prepare_audio_payload(None, 20, None, None, true).await.unwrap();
        assert!(!payload.has_audio());
        assert!(payload.forwarded);
        assert!(payload.volumes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let result =
            prepare_audio_payload(Some(Path::new("/nonexistent/x.wav")), 20, None, None, false).await;
        assert!(matches!(result, Err(AudioError::Read(_))));
    }
}
