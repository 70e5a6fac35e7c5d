//! Sentence Segmentation
//!
//! Boundary detection for streamed agent text. Two segmenters share the same
//! end-punctuation set and abbreviation rules:
//!
//! - **Language-aware**: Unicode sentence boundaries (UAX #29), used when the
//!   detected language is one whose punctuation conventions those rules cover.
//! - **Regex**: a scan for runs of end punctuation, used for everything else.
//!
//! Both only ever cut *after* end punctuation, and both refuse to cut after a
//! known abbreviation (`Dr.`, `U.S.`) or inside a token such as `3.14`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Sentence-ending punctuation
pub const END_PUNCTUATIONS: &[&str] = &[".", "!", "?", "。", "！", "？", "...", "。。。"];

/// Comma equivalents across scripts
pub const COMMAS: &[&str] = &[
    ",", "،", "，", "、", "፣", "၊", ";", "΄", "‛", "।", "﹐", "꓾", "⹁", "︐", "﹑", "､",
];

/// Abbreviations that end in a period but never end a sentence
pub const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Dr.", "Prof.", "Inc.", "Ltd.", "Jr.", "Sr.", "e.g.", "i.e.", "vs.", "St.",
    "Rd.", "U.S.",
];

/// ISO 639-3 codes of languages routed to the language-aware segmenter
const LANGUAGE_AWARE_CODES: &[&str] = &[
    "amh", "ara", "bul", "dan", "deu", "ell", "eng", "spa", "pes", "fra", "hin", "hye", "ita",
    "jpn", "mar", "mya", "nld", "pol", "rus", "slk", "urd", "cmn",
];

/// Closing quotes and brackets that stay attached to the sentence they end
const CLOSING_MARKS: &[char] = &['"', '\'', '”', '’', ')', ']', '」', '』', '）'];

/// Full-width terminators that end a sentence even without trailing space
const FULL_WIDTH_ENDS: &[char] = &['。', '！', '？'];

fn end_punctuation_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"[.!?。！？]+["'”’)\]」』）]*"#).expect("end punctuation pattern is valid")
    })
}

// =============================================================================
// Segmentation Method
// =============================================================================

/// Which segmenter the divider uses for untagged text
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMethod {
    /// Detect the language, use Unicode sentence boundaries when supported
    #[default]
    Language,
    /// Always use the punctuation scan
    Regex,
}

impl fmt::Display for SegmentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Language => write!(f, "language"),
            Self::Regex => write!(f, "regex"),
        }
    }
}

impl FromStr for SegmentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "language" => Ok(Self::Language),
            "regex" => Ok(Self::Regex),
            other => Err(format!("unknown segment method: {other}")),
        }
    }
}

/// Complete sentences cut from a buffer plus the unfinished tail
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segmentation {
    /// Complete sentences, trimmed, in order
    pub sentences: Vec<String>,
    /// Text after the last boundary (not yet a sentence)
    pub remaining: String,
}

// =============================================================================
// Predicates
// =============================================================================

/// Whether a token consists only of punctuation (end marks or commas)
#[must_use]
pub fn is_punctuation_token(token: &str) -> bool {
    let token = token.trim();
    !token.is_empty()
        && (END_PUNCTUATIONS.contains(&token)
            || COMMAS.contains(&token)
            || token
                .chars()
                .all(|c| is_end_char(c) || COMMAS.iter().any(|comma| comma.starts_with(c))))
}

/// Whether the text contains any sentence-ending punctuation
#[must_use]
pub fn contains_end_punctuation(text: &str) -> bool {
    text.chars().any(is_end_char)
}

/// Whether the text contains any comma equivalent
#[must_use]
pub fn contains_comma(text: &str) -> bool {
    COMMAS.iter().any(|comma| text.contains(comma))
}

/// Whether the text ends with a known abbreviation
///
/// The abbreviation must start at a word boundary, so `Dr.` matches in
/// `"Ask Dr."` but `St.` does not match in `"CAST."`.
#[must_use]
pub fn ends_with_abbreviation(text: &str) -> bool {
    let text = text.trim_end().trim_end_matches(CLOSING_MARKS);
    ABBREVIATIONS.iter().any(|abbr| {
        text.strip_suffix(abbr).is_some_and(|head| {
            head.chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric())
        })
    })
}

/// Whether the text ends with end punctuation and not with an abbreviation
#[must_use]
pub fn is_complete_sentence(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || ends_with_abbreviation(text) {
        return false;
    }
    text.trim_end_matches(CLOSING_MARKS)
        .chars()
        .next_back()
        .is_some_and(is_end_char)
}

fn is_end_char(c: char) -> bool {
    matches!(c, '.' | '!' | '?') || FULL_WIDTH_ENDS.contains(&c)
}

// =============================================================================
// Comma Split
// =============================================================================

/// Split at the earliest comma equivalent
///
/// Returns the head (trimmed, comma kept) and the untouched tail. Returns
/// `None` when there is no comma or nothing precedes it.
#[must_use]
pub fn split_at_first_comma(text: &str) -> Option<(String, String)> {
    let (idx, comma) = COMMAS
        .iter()
        .filter_map(|comma| text.find(comma).map(|idx| (idx, *comma)))
        .min_by_key(|(idx, _)| *idx)?;

    let end = idx + comma.len();
    let head = text[..idx].trim();
    if head.is_empty() {
        return None;
    }
    Some((format!("{head}{comma}"), text[end..].to_string()))
}

// =============================================================================
// Segmenters
// =============================================================================

/// Detect the language of `text`, if it is one the language-aware path covers
///
/// Returns the ISO 639-3 code.
#[must_use]
pub fn detect_language(text: &str) -> Option<&'static str> {
    let code = whatlang::detect(text)?.lang().code();
    LANGUAGE_AWARE_CODES.contains(&code).then_some(code)
}

/// Segment with the configured method
#[must_use]
pub fn segment(text: &str, method: SegmentMethod) -> Segmentation {
    if text.trim().is_empty() {
        return Segmentation {
            sentences: Vec::new(),
            remaining: text.to_string(),
        };
    }

    match method {
        SegmentMethod::Language => match detect_language(text) {
            Some(lang) => {
                tracing::trace!(lang, "Using language-aware segmentation");
                segment_unicode(text)
            }
            None => segment_regex(text),
        },
        SegmentMethod::Regex => segment_regex(text),
    }
}

/// Cut at every run of end punctuation that is followed by whitespace or the
/// end of the buffer
#[must_use]
pub fn segment_regex(text: &str) -> Segmentation {
    let mut sentences = Vec::new();
    let mut start = 0;

    for run in end_punctuation_run().find_iter(text) {
        if !is_boundary(text, run.as_str(), run.end()) {
            continue;
        }
        let candidate = text[start..run.end()].trim();
        if candidate.is_empty() || ends_with_abbreviation(candidate) {
            continue;
        }
        sentences.push(candidate.to_string());
        start = run.end();
    }

    Segmentation {
        sentences,
        remaining: text[start..].trim_start().to_string(),
    }
}

/// Cut on Unicode sentence boundaries, merging pieces that end in an
/// abbreviation or without end punctuation
#[must_use]
pub fn segment_unicode(text: &str) -> Segmentation {
    let mut sentences = Vec::new();
    let mut pending = String::new();

    for piece in text.split_sentence_bounds() {
        pending.push_str(piece);
        if is_complete_sentence(&pending) {
            sentences.push(pending.trim().to_string());
            pending.clear();
        }
    }

    Segmentation {
        sentences,
        remaining: pending.trim_start().to_string(),
    }
}

fn is_boundary(text: &str, run: &str, run_end: usize) -> bool {
    if run.chars().any(|c| FULL_WIDTH_ENDS.contains(&c)) {
        return true;
    }
    text[run_end..]
        .chars()
        .next()
        .map_or(true, char::is_whitespace)
}
