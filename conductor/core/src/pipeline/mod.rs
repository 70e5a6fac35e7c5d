//! Output Transform Pipeline
//!
//! Turns an agent's raw token stream into [`SentenceOutput`] items.
//!
//! # Architecture
//!
//! ```text
//!   tokens ─► SentenceDivider ─► ActionExtractor ─► DisplayFormatter ─► SpeechFilter ─► SentenceOutput
//!             (text::divider)     [joy] → actions    think → ( )        think → ""
//! ```
//!
//! Division is fixed as the first step. The remaining steps are
//! [`OutputStage`] objects composed in order by [`OutputPipelineBuilder`].
//! Each stage sees an [`OutputUnit`] that still carries the original
//! [`SentenceWithTags`], so a stage can be tested on its own from a bare
//! sentence without any other stage in front of it.

mod actions;
mod display;
mod speech;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};

use crate::error::ConversationError;
use crate::output::{Actions, DisplayText, SentenceOutput};
use crate::text::{DividerConfig, SentenceDivider, SentenceWithTags, SpeechFilterConfig, Translator};

pub use actions::{ActionExtractor, EmotionMap, ExpressionModel};
pub use display::DisplayFormatter;
pub use speech::SpeechFilter;

/// Stream of units flowing between stages
pub type UnitStream = BoxStream<'static, Result<OutputUnit, ConversationError>>;

/// A sentence on its way through the pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputUnit {
    /// The divider's output, untouched by later stages
    pub sentence: SentenceWithTags,
    /// Text for display (starts as the sentence text)
    pub display_text: DisplayText,
    /// Text for synthesis (starts as the sentence text)
    pub tts_text: String,
    /// Avatar actions
    pub actions: Actions,
}

impl From<SentenceWithTags> for OutputUnit {
    fn from(sentence: SentenceWithTags) -> Self {
        Self {
            display_text: DisplayText::new(sentence.text.clone()),
            tts_text: sentence.text.clone(),
            actions: Actions::default(),
            sentence,
        }
    }
}

impl OutputUnit {
    /// Drop the division metadata
    #[must_use]
    pub fn into_output(self) -> SentenceOutput {
        SentenceOutput {
            display_text: self.display_text,
            tts_text: self.tts_text,
            actions: self.actions,
        }
    }
}

/// One transform step after division
#[async_trait]
pub trait OutputStage: Send + Sync + 'static {
    /// Stage name for logs
    fn name(&self) -> &'static str;

    /// Transform a single unit
    async fn process(&self, unit: OutputUnit) -> OutputUnit;

    /// Transform a stream of units, passing errors through untouched
    fn transform(self: Arc<Self>, input: UnitStream) -> UnitStream {
        input
            .then(move |item| {
                let stage = Arc::clone(&self);
                async move {
                    match item {
                        Ok(unit) => Ok(stage.process(unit).await),
                        Err(err) => Err(err),
                    }
                }
            })
            .boxed()
    }
}

/// Divider plus an ordered list of stages
#[derive(Clone)]
pub struct OutputPipeline {
    divider: DividerConfig,
    stages: Vec<Arc<dyn OutputStage>>,
}

impl std::fmt::Debug for OutputPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPipeline")
            .field("divider", &self.divider)
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl OutputPipeline {
    /// Start building a pipeline around a divider configuration
    #[must_use]
    pub fn builder(divider: DividerConfig) -> OutputPipelineBuilder {
        OutputPipelineBuilder {
            divider,
            stages: Vec::new(),
        }
    }

    /// Actions, display formatting and speech filtering, in that order
    #[must_use]
    pub fn standard(
        divider: DividerConfig,
        expressions: Option<Arc<dyn ExpressionModel>>,
        display: DisplayFormatter,
        filter: SpeechFilterConfig,
        translator: Option<Arc<dyn Translator>>,
    ) -> Self {
        let mut speech = SpeechFilter::new(filter);
        if let Some(translator) = translator {
            speech = speech.with_translator(translator);
        }
        Self::builder(divider)
            .stage(ActionExtractor::new(expressions))
            .stage(display)
            .stage(speech)
            .build()
    }

    /// Names of the stages, in order
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run a token stream through division and every stage
    pub fn run<S>(&self, tokens: S) -> BoxStream<'static, Result<SentenceOutput, ConversationError>>
    where
        S: Stream<Item = Result<String, ConversationError>> + Send + 'static,
    {
        let units: UnitStream = SentenceDivider::new(self.divider.clone())
            .try_process_stream(tokens)
            .map_ok(OutputUnit::from)
            .boxed();

        self.stages
            .iter()
            .fold(units, |stream, stage| Arc::clone(stage).transform(stream))
            .map_ok(OutputUnit::into_output)
            .boxed()
    }
}

/// Builder for [`OutputPipeline`]
pub struct OutputPipelineBuilder {
    divider: DividerConfig,
    stages: Vec<Arc<dyn OutputStage>>,
}

impl OutputPipelineBuilder {
    /// Append a stage
    #[must_use]
    pub fn stage(mut self, stage: impl OutputStage) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a shared stage
    #[must_use]
    pub fn shared_stage(mut self, stage: Arc<dyn OutputStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> OutputPipeline {
        OutputPipeline {
            divider: self.divider,
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Expression;
    use pretty_assertions::assert_eq;

    fn tokens(items: &[&str]) -> impl Stream<Item = Result<String, ConversationError>> {
        let owned: Vec<Result<String, ConversationError>> =
            items.iter().map(|t| Ok((*t).to_string())).collect();
        futures::stream::iter(owned)
    }

    fn standard() -> OutputPipeline {
        let emotions = EmotionMap::new([("joy", Expression::Index(3))]);
        OutputPipeline::standard(
            DividerConfig::default(),
            Some(Arc::new(emotions)),
            DisplayFormatter::new("Mao", None),
            SpeechFilterConfig::default(),
            None,
        )
    }

    #[test]
    fn test_standard_stage_order() {
        assert_eq!(
            standard().stage_names(),
            vec!["action_extractor", "display_formatter", "speech_filter"]
        );
    }

    #[tokio::test]
    async fn test_standard_pipeline_end_to_end() {
        let outputs: Vec<SentenceOutput> = standard()
            .run(tokens(&["<think>", "Plan it.", "</think>", "[joy] Hello there", "!"]))
            .try_collect()
            .await
            .unwrap();

        let display: Vec<&str> = outputs.iter().map(|o| o.display_text.text.as_str()).collect();
        assert_eq!(display, vec!["(", "Plan it.", ")", "[joy] Hello there!"]);

        let speech: Vec<&str> = outputs.iter().map(|o| o.tts_text.as_str()).collect();
        assert_eq!(speech, vec!["", "", "", "Hello there!"]);

        assert_eq!(outputs[3].actions.expressions, Some(vec![Expression::Index(3)]));
        assert!(outputs[0].actions.is_empty(), "tag boundaries carry no actions");
        assert!(outputs
            .iter()
            .all(|o| o.display_text.name.as_deref() == Some("Mao")));
    }

    #[tokio::test]
    async fn test_pipeline_forwards_token_errors() {
        let stream = futures::stream::iter(vec![
            Ok("Fine".to_string()),
            Ok(".".to_string()),
            Ok(" More".to_string()),
            Err(ConversationError::agent("socket closed")),
        ]);
        let items: Vec<_> = standard().run(stream).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().tts_text, "Fine.");
        assert!(matches!(items[1], Err(ConversationError::Agent(_))));
    }

    #[tokio::test]
    async fn test_empty_builder_passes_sentences_through() {
        let pipeline = OutputPipeline::builder(DividerConfig::default()).build();
        let outputs: Vec<SentenceOutput> = pipeline
            .run(tokens(&["*waves* Hi."]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].tts_text, "*waves* Hi.");
        assert_eq!(outputs[0].display_text.name, None);
    }
}
