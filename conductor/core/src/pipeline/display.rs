//! Display formatting: speaker info and tag markers.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{OutputStage, OutputUnit};
use crate::text::TagState;

/// Sets the speaker on every sentence and swaps tag literals for markers
///
/// By default `<think>` is shown as `(` and `</think>` as `)`. Literals of
/// tags without markers are displayed verbatim.
#[derive(Clone, Debug)]
pub struct DisplayFormatter {
    name: String,
    avatar: Option<String>,
    markers: HashMap<String, (String, String)>,
}

impl DisplayFormatter {
    /// Formatter for one speaker
    pub fn new(name: impl Into<String>, avatar: Option<String>) -> Self {
        let mut markers = HashMap::new();
        markers.insert("think".to_string(), ("(".to_string(), ")".to_string()));
        Self {
            name: name.into(),
            avatar,
            markers,
        }
    }

    /// Set the open/close markers shown for a tag
    #[must_use]
    pub fn with_marker(
        mut self,
        tag: impl Into<String>,
        open: impl Into<String>,
        close: impl Into<String>,
    ) -> Self {
        self.markers.insert(tag.into(), (open.into(), close.into()));
        self
    }
}

#[async_trait]
impl OutputStage for DisplayFormatter {
    fn name(&self) -> &'static str {
        "display_formatter"
    }

    async fn process(&self, mut unit: OutputUnit) -> OutputUnit {
        for tag in &unit.sentence.tags {
            if let Some((open, close)) = self.markers.get(&tag.name) {
                match tag.state {
                    TagState::Start => unit.display_text.text.clone_from(open),
                    TagState::End => unit.display_text.text.clone_from(close),
                    TagState::SelfClosing => unit.display_text.text.clear(),
                    TagState::Inside | TagState::None => {}
                }
            }
        }
        unit.display_text.name = Some(self.name.clone());
        unit.display_text.avatar.clone_from(&self.avatar);
        unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{SentenceWithTags, TagInfo};

    fn literal(text: &str, name: &str, state: TagState) -> SentenceWithTags {
        SentenceWithTags {
            text: text.into(),
            tags: vec![TagInfo::new(name, state)],
        }
    }

    #[tokio::test]
    async fn test_think_markers_and_speaker() {
        let formatter = DisplayFormatter::new("Mao", Some("mao.png".into()));

        let open = formatter.process(literal("<think>", "think", TagState::Start).into()).await;
        assert_eq!(open.display_text.text, "(");
        assert_eq!(open.display_text.name.as_deref(), Some("Mao"));
        assert_eq!(open.display_text.avatar.as_deref(), Some("mao.png"));

        let inside = formatter.process(literal("hmm", "think", TagState::Inside).into()).await;
        assert_eq!(inside.display_text.text, "hmm");

        let close = formatter.process(literal("</think>", "think", TagState::End).into()).await;
        assert_eq!(close.display_text.text, ")");
    }

    #[tokio::test]
    async fn test_custom_and_unknown_markers() {
        let formatter = DisplayFormatter::new("Mao", None).with_marker("aside", "[", "]");

        let open = formatter.process(literal("<aside>", "aside", TagState::Start).into()).await;
        assert_eq!(open.display_text.text, "[");

        let other = formatter.process(literal("<note>", "note", TagState::Start).into()).await;
        assert_eq!(other.display_text.text, "<note>");
    }
}
