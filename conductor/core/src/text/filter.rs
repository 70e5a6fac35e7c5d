//! Speech Text Filters
//!
//! Cleanup applied to a sentence right before synthesis. Nothing here touches
//! what is displayed or what the agent remembers; only the audio changes.
//!
//! Filters run in a fixed order: asterisk spans, square brackets,
//! parentheses, special characters, angle brackets. A translator, when
//! configured, runs last (see [`crate::pipeline::SpeechFilter`]).

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which speech filters are enabled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechFilterConfig {
    /// Keep only letters, numbers, punctuation and whitespace
    pub remove_special_char: bool,
    /// Drop `[...]` regions (nested)
    pub ignore_brackets: bool,
    /// Drop `(...)` regions (nested)
    pub ignore_parentheses: bool,
    /// Drop `*...*` spans
    pub ignore_asterisks: bool,
    /// Drop `<...>` regions (nested)
    pub ignore_angle_brackets: bool,
}

impl Default for SpeechFilterConfig {
    fn default() -> Self {
        Self {
            remove_special_char: true,
            ignore_brackets: true,
            ignore_parentheses: true,
            ignore_asterisks: true,
            ignore_angle_brackets: true,
        }
    }
}

impl SpeechFilterConfig {
    /// All filters disabled
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            remove_special_char: false,
            ignore_brackets: false,
            ignore_parentheses: false,
            ignore_asterisks: false,
            ignore_angle_brackets: false,
        }
    }
}

/// Translates speech text into the synthesis language
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate one sentence
    async fn translate(&self, text: &str) -> anyhow::Result<String>;
}

/// Apply every enabled filter in order
#[must_use]
pub fn filter_speech_text(text: &str, config: &SpeechFilterConfig) -> String {
    let mut text = text.to_string();
    if config.ignore_asterisks {
        text = filter_asterisks(&text);
    }
    if config.ignore_brackets {
        text = filter_brackets(&text);
    }
    if config.ignore_parentheses {
        text = filter_parentheses(&text);
    }
    if config.remove_special_char {
        text = remove_special_characters(&text);
    }
    if config.ignore_angle_brackets {
        text = filter_angle_brackets(&text);
    }
    tracing::trace!(filtered = %text, "Speech text filtered");
    text
}

/// Drop `*action*`, `**bold**` and similar spans
#[must_use]
pub fn filter_asterisks(text: &str) -> String {
    static SPAN: OnceLock<Regex> = OnceLock::new();
    let span = SPAN.get_or_init(|| Regex::new(r"\*+[^*]*\*+").expect("asterisk pattern is valid"));
    collapse_whitespace(&span.replace_all(text, ""))
}

/// Drop `[...]` regions, including nested ones
#[must_use]
pub fn filter_brackets(text: &str) -> String {
    filter_nested(text, '[', ']')
}

/// Drop `(...)` regions, including nested ones
#[must_use]
pub fn filter_parentheses(text: &str) -> String {
    filter_nested(text, '(', ')')
}

/// Drop `<...>` regions, including nested ones
#[must_use]
pub fn filter_angle_brackets(text: &str) -> String {
    filter_nested(text, '<', '>')
}

/// Keep only letters, numbers, punctuation and whitespace
///
/// Emoji and symbols (`$`, `+`, `★`) are removed.
#[must_use]
pub fn remove_special_characters(text: &str) -> String {
    static SPECIAL: OnceLock<Regex> = OnceLock::new();
    let special = SPECIAL
        .get_or_init(|| Regex::new(r"[^\p{L}\p{N}\p{P}\s]").expect("special character pattern is valid"));
    special.replace_all(text, "").into_owned()
}

/// Remove regions between `left` and `right`; unmatched closers are dropped
fn filter_nested(text: &str, left: char, right: char) -> String {
    let mut depth = 0usize;
    let kept: String = text
        .chars()
        .filter(|&c| {
            if c == left {
                depth += 1;
                false
            } else if c == right {
                depth = depth.saturating_sub(1);
                false
            } else {
                depth == 0
            }
        })
        .collect();
    collapse_whitespace(&kept)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_asterisks() {
        assert_eq!(filter_asterisks("Hello *waves* there"), "Hello there");
        assert_eq!(filter_asterisks("**Bold** move"), "move");
        assert_eq!(filter_asterisks("a * b"), "a * b");
    }

    #[test]
    fn test_filter_nested_brackets() {
        assert_eq!(filter_brackets("Hi [joy [big]] there"), "Hi there");
        assert_eq!(filter_parentheses("Yes (quietly (very)) ok"), "Yes ok");
        assert_eq!(filter_angle_brackets("<think>hm</think> Answer"), "hm Answer");
    }

    #[test]
    fn test_unmatched_closer_is_dropped() {
        assert_eq!(filter_parentheses("oops) fine"), "oops fine");
        assert_eq!(filter_brackets("[never closed"), "");
    }

    #[test]
    fn test_remove_special_characters() {
        assert_eq!(remove_special_characters("Price: $5 + tax ★"), "Price: 5  tax ");
        assert_eq!(remove_special_characters("你好，世界！😀"), "你好，世界！");
        assert_eq!(remove_special_characters("naïve — café…"), "naïve — café…");
        // Punctuation outside the common blocks is kept
        assert_eq!(remove_special_characters("שלום׃ ๚ ᠂ ✓"), "שלום׃ ๚ ᠂ ");
    }

    #[test]
    fn test_full_filter_chain() {
        let text = "[happy] *smiles* Nice to meet you! (really) 😀";
        assert_eq!(
            filter_speech_text(text, &SpeechFilterConfig::default()),
            "Nice to meet you!"
        );
    }

    #[test]
    fn test_passthrough_keeps_text() {
        let text = "[happy] *smiles* hi";
        assert_eq!(filter_speech_text(text, &SpeechFilterConfig::passthrough()), text);
    }
}
