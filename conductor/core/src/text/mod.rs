//! Text Processing
//!
//! Everything between raw agent tokens and the text that reaches the screen
//! or the synthesizer:
//!
//! - [`segment`]: sentence boundary rules
//! - [`divider`]: tag-aware streaming division into [`SentenceWithTags`]
//! - [`filter`]: cleanup of text before it is spoken

pub mod divider;
pub mod filter;
pub mod segment;

pub use divider::{DividerConfig, SentenceDivider, SentenceWithTags, TagInfo, TagState};
pub use filter::{filter_speech_text, SpeechFilterConfig, Translator};
pub use segment::{segment, SegmentMethod, Segmentation};
