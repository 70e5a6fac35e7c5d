//! Tag-Aware Sentence Divider
//!
//! Turns a token stream into ordered [`SentenceWithTags`] units while tracking
//! nested annotation tags such as `<think>...</think>`.
//!
//! # Architecture
//!
//! ```text
//!   tokens ──► push_token() ──► buffer ──┬──► tag literal ──► [tag START/END/SELF_CLOSING]
//!                                        │
//!                                        ├──► text before tag (current stack)
//!                                        │
//!                                        └──► segment() ──► sentences (current stack)
//!   end    ──► finish() ──► remaining tags, remaining text, unclosed-tag report
//! ```
//!
//! The divider itself is a synchronous state machine (`push_token` / `finish`),
//! so it can be unit tested token by token. [`SentenceDivider::process_stream`]
//! and [`SentenceDivider::try_process_stream`] wrap it around an async stream.
//!
//! # Processing triggers
//!
//! Buffered text is only segmented when one of these holds:
//! - a recognized tag literal is complete in the buffer
//! - the previous token was punctuation and this one is not
//! - the buffer holds at least `flush_threshold` characters
//!
//! Waiting for the token after punctuation keeps `3.` + `14` or `Dr` + `.` +
//! ` Smith` from being cut early.

use std::collections::VecDeque;
use std::convert::Infallible;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::segment::{
    contains_end_punctuation, is_punctuation_token, segment, split_at_first_comma, SegmentMethod,
};

// =============================================================================
// Tag Types
// =============================================================================

/// Position of a sentence relative to one tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
    /// The opening tag literal itself
    Start,
    /// Text inside an open tag
    Inside,
    /// The closing tag literal itself
    End,
    /// A self-closing tag literal (`<name/>`)
    SelfClosing,
    /// No tag is open
    None,
}

/// One level of an annotation tag at the moment a sentence was cut
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    /// Tag name (empty for the no-tag marker)
    pub name: String,
    /// Where the sentence sits relative to this tag
    pub state: TagState,
}

impl TagInfo {
    /// Create tag info
    pub fn new(name: impl Into<String>, state: TagState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    /// The normalized "no tag open" marker
    #[must_use]
    pub fn none() -> Self {
        Self::new("", TagState::None)
    }

    /// Whether this entry is the tag literal itself rather than enclosed text
    #[must_use]
    pub fn is_boundary(&self) -> bool {
        matches!(
            self.state,
            TagState::Start | TagState::End | TagState::SelfClosing
        )
    }
}

/// A unit of text cut from the stream, with its tag context
///
/// `tags` is ordered outermost to innermost and is never empty: untagged text
/// carries a single [`TagInfo::none`] entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceWithTags {
    /// The sentence text or tag literal
    pub text: String,
    /// Tag context, outermost first
    pub tags: Vec<TagInfo>,
}

impl SentenceWithTags {
    /// Untagged sentence
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tags: vec![TagInfo::none()],
        }
    }

    /// Whether this unit is a tag literal (START, END or SELF_CLOSING)
    #[must_use]
    pub fn is_tag_boundary(&self) -> bool {
        self.tags.iter().any(TagInfo::is_boundary)
    }

    /// Whether no tag is open around this unit
    #[must_use]
    pub fn is_untagged(&self) -> bool {
        self.tags.iter().all(|t| t.state == TagState::None)
    }

    /// Whether `name` is open around (or is) this unit
    #[must_use]
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.state != TagState::None && t.name == name)
    }

    /// Innermost tag entry
    #[must_use]
    pub fn innermost(&self) -> Option<&TagInfo> {
        self.tags.last()
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Divider behaviour
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DividerConfig {
    /// Cut the first sentence at its first comma for lower first-audio latency
    pub faster_first_response: bool,
    /// Segmenter used for untagged text
    pub segment_method: SegmentMethod,
    /// Tag names recognized in the stream; anything else is plain text
    pub valid_tags: Vec<String>,
    /// Buffer length (characters) that forces segmentation
    pub flush_threshold: usize,
}

impl Default for DividerConfig {
    fn default() -> Self {
        Self {
            faster_first_response: true,
            segment_method: SegmentMethod::Language,
            valid_tags: vec!["think".to_string()],
            flush_threshold: 25,
        }
    }
}

impl DividerConfig {
    /// Set faster first response
    #[must_use]
    pub fn with_faster_first_response(mut self, enabled: bool) -> Self {
        self.faster_first_response = enabled;
        self
    }

    /// Set the segmentation method
    #[must_use]
    pub fn with_segment_method(mut self, method: SegmentMethod) -> Self {
        self.segment_method = method;
        self
    }

    /// Replace the recognized tag names
    #[must_use]
    pub fn with_valid_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

// =============================================================================
// Divider
// =============================================================================

struct TagMatch {
    start: usize,
    end: usize,
    name: String,
    state: TagState,
}

/// Streaming sentence divider with a tag stack
#[derive(Debug)]
pub struct SentenceDivider {
    config: DividerConfig,
    buffer: String,
    tag_stack: Vec<String>,
    first_sentence: bool,
    last_token_was_punct: bool,
    full_response: String,
}

impl Default for SentenceDivider {
    fn default() -> Self {
        Self::new(DividerConfig::default())
    }
}

impl SentenceDivider {
    /// Create a divider
    #[must_use]
    pub fn new(config: DividerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            tag_stack: Vec::new(),
            first_sentence: true,
            last_token_was_punct: false,
            full_response: String::new(),
        }
    }

    /// Everything pushed so far, verbatim
    #[must_use]
    pub fn complete_response(&self) -> &str {
        &self.full_response
    }

    /// Names of tags currently open, outermost first
    #[must_use]
    pub fn open_tags(&self) -> &[String] {
        &self.tag_stack
    }

    /// Reset for a new response
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.tag_stack.clear();
        self.first_sentence = true;
        self.last_token_was_punct = false;
        self.full_response.clear();
    }

    /// Feed one token, returning any units it completed
    pub fn push_token(&mut self, token: &str) -> Vec<SentenceWithTags> {
        self.buffer.push_str(token);
        self.full_response.push_str(token);

        let mut out = Vec::new();
        self.extract_tags(&mut out);

        if is_punctuation_token(token) {
            self.last_token_was_punct = true;
            return out;
        }

        if std::mem::take(&mut self.last_token_was_punct) {
            if self.first_sentence && self.config.faster_first_response {
                if let Some((head, tail)) = split_at_first_comma(&self.buffer) {
                    self.emit_text(&head, &mut out);
                    self.buffer = tail;
                }
            }
            if contains_end_punctuation(&self.buffer) {
                self.segment_buffer(&mut out);
            }
        } else if self.buffer.chars().count() >= self.config.flush_threshold {
            self.segment_buffer(&mut out);
        }

        out
    }

    /// Flush at end of stream
    ///
    /// Tags still complete in the buffer are extracted, the remaining text is
    /// emitted with whatever tags are open, and unclosed tags are reported.
    pub fn finish(&mut self) -> Vec<SentenceWithTags> {
        let mut out = Vec::new();
        self.extract_tags(&mut out);

        let rest = std::mem::take(&mut self.buffer);
        self.flush_text(&rest, &mut out);
        self.last_token_was_punct = false;

        if !self.tag_stack.is_empty() {
            tracing::warn!(
                open_tags = ?self.tag_stack,
                "Response ended with unclosed tags"
            );
        }
        out
    }

    /// Divide an infallible token stream
    pub fn process_stream<'a, S>(self, tokens: S) -> BoxStream<'a, SentenceWithTags>
    where
        S: Stream<Item = String> + Send + 'a,
    {
        self.try_process_stream(tokens.map(Ok::<String, Infallible>))
            .filter_map(|item| futures::future::ready(item.ok()))
            .boxed()
    }

    /// Divide a fallible token stream
    ///
    /// The first error is yielded and ends the stream; text still buffered at
    /// that point is discarded.
    pub fn try_process_stream<'a, S, E>(
        self,
        tokens: S,
    ) -> BoxStream<'a, Result<SentenceWithTags, E>>
    where
        S: Stream<Item = Result<String, E>> + Send + 'a,
        E: Send + 'a,
    {
        let state = DivisionState {
            divider: self,
            tokens: Box::pin(tokens),
            pending: VecDeque::new(),
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(sentence) = state.pending.pop_front() {
                    return Some((Ok(sentence), state));
                }
                if state.done {
                    return None;
                }
                match state.tokens.next().await {
                    Some(Ok(token)) => {
                        let units = state.divider.push_token(&token);
                        state.pending.extend(units);
                    }
                    Some(Err(err)) => {
                        state.done = true;
                        return Some((Err(err), state));
                    }
                    None => {
                        state.done = true;
                        let units = state.divider.finish();
                        state.pending.extend(units);
                    }
                }
            }
        })
        .boxed()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn extract_tags(&mut self, out: &mut Vec<SentenceWithTags>) {
        while let Some(tag) = self.find_earliest_tag() {
            let before = self.buffer[..tag.start].to_string();
            let literal = self.buffer[tag.start..tag.end].to_string();
            let rest = self.buffer[tag.end..].to_string();

            self.flush_text(&before, out);
            out.push(SentenceWithTags {
                text: literal,
                tags: vec![TagInfo::new(tag.name.clone(), tag.state)],
            });
            self.apply_tag(&tag.name, tag.state);
            self.buffer = rest;
        }
    }

    fn find_earliest_tag(&self) -> Option<TagMatch> {
        let mut best: Option<TagMatch> = None;
        for name in &self.config.valid_tags {
            let patterns = [
                (format!("<{name}>"), TagState::Start),
                (format!("</{name}>"), TagState::End),
                (format!("<{name}/>"), TagState::SelfClosing),
                (format!("<{name} />"), TagState::SelfClosing),
            ];
            for (pattern, state) in patterns {
                if let Some(start) = self.buffer.find(&pattern) {
                    if best.as_ref().map_or(true, |b| start < b.start) {
                        best = Some(TagMatch {
                            start,
                            end: start + pattern.len(),
                            name: name.clone(),
                            state,
                        });
                    }
                }
            }
        }
        best
    }

    fn apply_tag(&mut self, name: &str, state: TagState) {
        match state {
            TagState::Start => self.tag_stack.push(name.to_string()),
            TagState::End => match self.tag_stack.iter().rposition(|open| open == name) {
                Some(pos) if pos + 1 == self.tag_stack.len() => {
                    self.tag_stack.pop();
                }
                Some(pos) => {
                    tracing::warn!(
                        tag = name,
                        open_tags = ?self.tag_stack,
                        "Closing tag does not match innermost open tag"
                    );
                    self.tag_stack.truncate(pos);
                }
                None => {
                    tracing::warn!(tag = name, "Closing tag without matching open tag");
                }
            },
            TagState::SelfClosing | TagState::Inside | TagState::None => {}
        }
    }

    fn current_tags(&self) -> Vec<TagInfo> {
        if self.tag_stack.is_empty() {
            vec![TagInfo::none()]
        } else {
            self.tag_stack
                .iter()
                .map(|name| TagInfo::new(name.clone(), TagState::Inside))
                .collect()
        }
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<SentenceWithTags>) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        out.push(SentenceWithTags {
            text: text.to_string(),
            tags: self.current_tags(),
        });
        self.first_sentence = false;
    }

    /// Emit every sentence in `text`, including an unfinished tail
    fn flush_text(&mut self, text: &str, out: &mut Vec<SentenceWithTags>) {
        if text.trim().is_empty() {
            return;
        }
        let segmented = segment(text, self.config.segment_method);
        for sentence in &segmented.sentences {
            self.emit_text(sentence, out);
        }
        self.emit_text(&segmented.remaining, out);
    }

    fn segment_buffer(&mut self, out: &mut Vec<SentenceWithTags>) {
        let segmented = segment(&self.buffer, self.config.segment_method);
        for sentence in &segmented.sentences {
            self.emit_text(sentence, out);
        }
        self.buffer = segmented.remaining;
    }
}

struct DivisionState<S> {
    divider: SentenceDivider,
    tokens: std::pin::Pin<Box<S>>,
    pending: VecDeque<SentenceWithTags>,
    done: bool,
}
