//! Action extraction: bracketed emotion keywords become avatar expressions.

use std::sync::Arc;

use async_trait::async_trait;

use super::{OutputStage, OutputUnit};
use crate::output::Expression;

/// Maps sentence text to avatar expressions
pub trait ExpressionModel: Send + Sync {
    /// Expressions found in `text`, in order of appearance
    fn extract_expressions(&self, text: &str) -> Vec<Expression>;
}

/// Keyword table: `[keyword]` in the text selects an expression
///
/// Matching is case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct EmotionMap {
    entries: Vec<(String, Expression)>,
}

impl EmotionMap {
    /// Build from `(keyword, expression)` pairs
    pub fn new<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Expression)>,
        K: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(key, expr)| (format!("[{}]", key.into().to_lowercase()), expr))
                .collect(),
        }
    }

    /// Number of keywords
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no keywords
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExpressionModel for EmotionMap {
    fn extract_expressions(&self, text: &str) -> Vec<Expression> {
        let lower = text.to_lowercase();
        let mut found = Vec::new();
        let mut rest = lower.as_str();

        while let Some(open) = rest.find('[') {
            rest = &rest[open..];
            match self.entries.iter().find(|(tag, _)| rest.starts_with(tag.as_str())) {
                Some((tag, expr)) => {
                    found.push(expr.clone());
                    rest = &rest[tag.len()..];
                }
                None => rest = &rest[1..],
            }
        }
        found
    }
}

/// Attaches expressions to sentences that are not tag literals
pub struct ActionExtractor {
    model: Option<Arc<dyn ExpressionModel>>,
}

impl ActionExtractor {
    /// Create; with no model every sentence gets empty actions
    #[must_use]
    pub fn new(model: Option<Arc<dyn ExpressionModel>>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl OutputStage for ActionExtractor {
    fn name(&self) -> &'static str {
        "action_extractor"
    }

    async fn process(&self, mut unit: OutputUnit) -> OutputUnit {
        if unit.sentence.is_tag_boundary() {
            return unit;
        }
        if let Some(model) = &self.model {
            let expressions = model.extract_expressions(&unit.sentence.text);
            if !expressions.is_empty() {
                tracing::debug!(count = expressions.len(), "Expressions extracted");
                unit.actions.expressions = Some(expressions);
            }
        }
        unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{SentenceWithTags, TagInfo, TagState};

    fn emotions() -> EmotionMap {
        EmotionMap::new([
            ("joy", Expression::Index(3)),
            ("Sad", Expression::Name("sad".into())),
        ])
    }

    #[test]
    fn test_extracts_in_order_case_insensitive() {
        let found = emotions().extract_expressions("[SAD] oh [joy] wait [joy] [unknown]");
        assert_eq!(
            found,
            vec![
                Expression::Name("sad".into()),
                Expression::Index(3),
                Expression::Index(3)
            ]
        );
    }

    #[test]
    fn test_no_keywords() {
        assert!(emotions().extract_expressions("plain [text").is_empty());
    }

    #[tokio::test]
    async fn test_stage_skips_tag_literals() {
        let stage = ActionExtractor::new(Some(Arc::new(emotions())));

        let literal = SentenceWithTags {
            text: "<think>".into(),
            tags: vec![TagInfo::new("think", TagState::Start)],
        };
        let unit = stage.process(literal.into()).await;
        assert!(unit.actions.is_empty());

        let unit = stage.process(SentenceWithTags::plain("[joy] hi").into()).await;
        assert_eq!(unit.actions.expressions, Some(vec![Expression::Index(3)]));
    }
}
