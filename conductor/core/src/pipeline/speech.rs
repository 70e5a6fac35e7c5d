//! Speech filtering: decides what, if anything, is synthesized for a unit.

use std::sync::Arc;

use async_trait::async_trait;

use super::{OutputStage, OutputUnit};
use crate::text::{filter_speech_text, SpeechFilterConfig, Translator};

/// Produces the synthesis text for each unit
///
/// Tag literals and anything inside a silent tag (`think` by default) get
/// empty speech text. Everything else is filtered from the display text and
/// optionally translated.
pub struct SpeechFilter {
    config: SpeechFilterConfig,
    silent_tags: Vec<String>,
    translator: Option<Arc<dyn Translator>>,
}

impl SpeechFilter {
    /// Create with the default silent tag set
    #[must_use]
    pub fn new(config: SpeechFilterConfig) -> Self {
        Self {
            config,
            silent_tags: vec!["think".to_string()],
            translator: None,
        }
    }

    /// Translate speech text after filtering
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Replace the set of tags whose content is never spoken
    #[must_use]
    pub fn with_silent_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.silent_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl OutputStage for SpeechFilter {
    fn name(&self) -> &'static str {
        "speech_filter"
    }

    async fn process(&self, mut unit: OutputUnit) -> OutputUnit {
        let silent = unit.sentence.is_tag_boundary()
            || self.silent_tags.iter().any(|tag| unit.sentence.has_tag(tag));
        if silent {
            unit.tts_text.clear();
            return unit;
        }

        let mut speech = filter_speech_text(&unit.display_text.text, &self.config);
        if let Some(translator) = &self.translator {
            if !speech.trim().is_empty() {
                match translator.translate(&speech).await {
                    Ok(translated) => speech = translated,
                    Err(e) => {
                        tracing::warn!(error = %e, "Translation failed, speaking untranslated text");
                    }
                }
            }
        }
        unit.tts_text = speech;
        unit
    }
}
