//! TOML Configuration File Support
//!
//! Loads the settings the core needs from `~/.config/chorus/config.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. Explicit overrides ([`ConfigOverrides`])
//! 2. Environment variables (`CHORUS_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file lives at `$XDG_CONFIG_HOME/chorus/config.toml`
//! (typically `~/.config/chorus/config.toml`). A missing file is not an error.
//!
//! # Example Configuration
//!
//! ```toml
//! [divider]
//! faster_first_response = true
//! segment_method = "language"
//! valid_tags = ["think"]
//!
//! [speech_filter]
//! ignore_asterisks = false
//!
//! [conversation]
//! playback_timeout_secs = 120
//! max_concurrent_synthesis = 2
//! max_group_turns = 12
//!
//! [character]
//! conf_uid = "mao_pro"
//! name = "Mao"
//! human_name = "Ari"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{DisplayFormatter, ExpressionModel, OutputPipeline};
use crate::service::{CharacterProfile, ConversationSettings};
use crate::text::{DividerConfig, SegmentMethod, SpeechFilterConfig, Translator};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Explicit override from the embedding program
    Override,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[divider]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DividerToml {
    /// Cut the first sentence at a comma
    pub faster_first_response: Option<bool>,
    /// `"language"` or `"regex"`
    pub segment_method: Option<SegmentMethod>,
    /// Recognized tag names
    pub valid_tags: Option<Vec<String>>,
    /// Buffer length that forces segmentation
    pub flush_threshold: Option<usize>,
}

/// `[speech_filter]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechFilterToml {
    /// Keep only letters, numbers, punctuation and whitespace
    pub remove_special_char: Option<bool>,
    /// Drop `[...]` regions
    pub ignore_brackets: Option<bool>,
    /// Drop `(...)` regions
    pub ignore_parentheses: Option<bool>,
    /// Drop `*...*` spans
    pub ignore_asterisks: Option<bool>,
    /// Drop `<...>` regions
    pub ignore_angle_brackets: Option<bool>,
}

/// `[conversation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationToml {
    /// Playback acknowledgement timeout in seconds
    pub playback_timeout_secs: Option<u64>,
    /// Status text sent when a turn starts
    pub thinking_text: Option<String>,
    /// Volume envelope slice length
    pub audio_slice_ms: Option<u32>,
    /// Concurrent syntheses per conversation
    pub max_concurrent_synthesis: Option<usize>,
    /// Member turns per group conversation
    pub max_group_turns: Option<usize>,
}

/// `[character]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterToml {
    /// Character config ID
    pub conf_uid: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Avatar asset
    pub avatar: Option<String>,
    /// How the user is addressed
    pub human_name: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusToml {
    /// Sentence divider section
    pub divider: DividerToml,
    /// Speech filter section
    pub speech_filter: SpeechFilterToml,
    /// Conversation section
    pub conversation: ConversationToml,
    /// Character section
    pub character: CharacterToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective configuration of the core
#[derive(Clone, Debug)]
pub struct ChorusConfig {
    /// Sentence divider behavior
    pub divider: DividerConfig,
    /// Speech text filters
    pub speech_filter: SpeechFilterConfig,
    /// Turn behavior
    pub conversation: ConversationSettings,
    /// The character
    pub character: CharacterProfile,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            divider: DividerConfig::default(),
            speech_filter: SpeechFilterConfig::default(),
            conversation: ConversationSettings::default(),
            character: CharacterProfile::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChorusConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// The standard output pipeline for this character
    #[must_use]
    pub fn output_pipeline(
        &self,
        expressions: Option<Arc<dyn ExpressionModel>>,
        translator: Option<Arc<dyn Translator>>,
    ) -> OutputPipeline {
        let display = DisplayFormatter::new(self.character.name.clone(), self.character.avatar.clone());
        OutputPipeline::standard(
            self.divider.clone(),
            expressions,
            display,
            self.speech_filter.clone(),
            translator,
        )
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));
        if self.divider.flush_threshold == 0 {
            return invalid("divider.flush_threshold must be greater than 0");
        }
        if self.conversation.audio_slice_ms == 0 {
            return invalid("conversation.audio_slice_ms must be greater than 0");
        }
        if self.conversation.max_concurrent_synthesis == 0 {
            return invalid("conversation.max_concurrent_synthesis must be greater than 0");
        }
        if self.conversation.playback_timeout_secs == 0 {
            return invalid("conversation.playback_timeout_secs must be greater than 0");
        }
        if let Some(tag) = self.divider.valid_tags.iter().find(|t| !is_tag_name(t)) {
            return Err(ConfigError::ValidationError(format!(
                "divider.valid_tags contains an invalid tag name: {tag:?}"
            )));
        }
        Ok(())
    }
}

fn is_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chorus/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chorus").join("config.toml"))
}

/// Load configuration from the default path, the environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the result fails validation.
pub fn load_config() -> Result<ChorusConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or if the
/// result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChorusConfig, ConfigError> {
    let mut config = ChorusConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ChorusToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChorusConfig, toml: &ChorusToml) {
    let divider = &toml.divider;
    if let Some(enabled) = divider.faster_first_response {
        config.divider.faster_first_response = enabled;
    }
    if let Some(method) = divider.segment_method {
        config.divider.segment_method = method;
    }
    if let Some(ref tags) = divider.valid_tags {
        config.divider.valid_tags = tags.clone();
    }
    if let Some(threshold) = divider.flush_threshold {
        config.divider.flush_threshold = threshold;
    }

    let filter = &toml.speech_filter;
    if let Some(v) = filter.remove_special_char {
        config.speech_filter.remove_special_char = v;
    }
    if let Some(v) = filter.ignore_brackets {
        config.speech_filter.ignore_brackets = v;
    }
    if let Some(v) = filter.ignore_parentheses {
        config.speech_filter.ignore_parentheses = v;
    }
    if let Some(v) = filter.ignore_asterisks {
        config.speech_filter.ignore_asterisks = v;
    }
    if let Some(v) = filter.ignore_angle_brackets {
        config.speech_filter.ignore_angle_brackets = v;
    }

    let conversation = &toml.conversation;
    if let Some(secs) = conversation.playback_timeout_secs {
        config.conversation.playback_timeout_secs = secs;
    }
    if let Some(ref text) = conversation.thinking_text {
        config.conversation.thinking_text = text.clone();
    }
    if let Some(ms) = conversation.audio_slice_ms {
        config.conversation.audio_slice_ms = ms;
    }
    if let Some(n) = conversation.max_concurrent_synthesis {
        config.conversation.max_concurrent_synthesis = n;
    }
    if conversation.max_group_turns.is_some() {
        config.conversation.max_group_turns = conversation.max_group_turns;
    }

    let character = &toml.character;
    if let Some(ref uid) = character.conf_uid {
        config.character.conf_uid = uid.clone();
    }
    if let Some(ref name) = character.name {
        config.character.name = name.clone();
    }
    if character.avatar.is_some() {
        config.character.avatar = character.avatar.clone();
    }
    if let Some(ref name) = character.human_name {
        config.character.human_name = name.clone();
    }
}

/// Apply `CHORUS_*` variables, read through `var`
fn apply_env_config(config: &mut ChorusConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(value) = var("CHORUS_FASTER_FIRST_RESPONSE") {
        config.divider.faster_first_response = value != "0" && value.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(value) = var("CHORUS_SEGMENT_METHOD") {
        match value.parse::<SegmentMethod>() {
            Ok(method) => {
                config.divider.segment_method = method;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring CHORUS_SEGMENT_METHOD"),
        }
    }
    if let Some(value) = var("CHORUS_VALID_TAGS") {
        config.divider.valid_tags = value
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        config.source = ConfigSource::Env;
    }
    if let Some(value) = var("CHORUS_PLAYBACK_TIMEOUT_SECS") {
        if let Ok(secs) = value.parse::<u64>() {
            config.conversation.playback_timeout_secs = secs;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = var("CHORUS_MAX_CONCURRENT_SYNTHESIS") {
        if let Ok(n) = value.parse::<usize>() {
            config.conversation.max_concurrent_synthesis = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(name) = var("CHORUS_CHARACTER_NAME") {
        config.character.name = name;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// Override Support
// =============================================================================

/// Overrides applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Faster first response override
    pub faster_first_response: Option<bool>,
    /// Valid tags override
    pub valid_tags: Option<Vec<String>>,
    /// Playback timeout override (seconds)
    pub playback_timeout_secs: Option<u64>,
    /// Group turn limit override
    pub max_group_turns: Option<usize>,
    /// Character name override
    pub character_name: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set faster first response override
    #[must_use]
    pub fn with_faster_first_response(mut self, enabled: bool) -> Self {
        self.faster_first_response = Some(enabled);
        self
    }

    /// Set valid tags override
    #[must_use]
    pub fn with_valid_tags(mut self, tags: Vec<String>) -> Self {
        self.valid_tags = Some(tags);
        self
    }

    /// Set playback timeout override
    #[must_use]
    pub fn with_playback_timeout_secs(mut self, secs: u64) -> Self {
        self.playback_timeout_secs = Some(secs);
        self
    }

    /// Set group turn limit override
    #[must_use]
    pub fn with_max_group_turns(mut self, turns: usize) -> Self {
        self.max_group_turns = Some(turns);
        self
    }

    /// Set character name override
    #[must_use]
    pub fn with_character_name(mut self, name: impl Into<String>) -> Self {
        self.character_name = Some(name.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.faster_first_response.is_none()
            && self.valid_tags.is_none()
            && self.playback_timeout_secs.is_none()
            && self.max_group_turns.is_none()
            && self.character_name.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns an error when the overridden configuration fails validation.
    pub fn apply(&self, config: &mut ChorusConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Override;

        if let Some(enabled) = self.faster_first_response {
            config.divider.faster_first_response = enabled;
        }
        if let Some(ref tags) = self.valid_tags {
            config.divider.valid_tags = tags.clone();
        }
        if let Some(secs) = self.playback_timeout_secs {
            config.conversation.playback_timeout_secs = secs;
        }
        if self.max_group_turns.is_some() {
            config.conversation.max_group_turns = self.max_group_turns;
        }
        if let Some(ref name) = self.character_name {
            config.character.name = name.clone();
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn parse(content: &str) -> ChorusConfig {
        let toml: ChorusToml = toml::from_str(content).unwrap();
        let mut config = ChorusConfig::default();
        apply_toml_config(&mut config, &toml);
        config
    }

    #[test]
    fn test_default_config() {
        let config = ChorusConfig::default();
        assert!(config.divider.faster_first_response);
        assert_eq!(config.divider.valid_tags, vec!["think".to_string()]);
        assert_eq!(config.conversation.playback_timeout_secs, 600);
        assert_eq!(config.conversation.thinking_text, "Thinking...");
        assert_eq!(config.conversation.audio_slice_ms, 20);
        assert_eq!(config.character.human_name, "Human");
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("chorus/config.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let config = parse(
            r#"
[divider]
faster_first_response = false
segment_method = "regex"
valid_tags = ["think", "aside"]

[speech_filter]
ignore_asterisks = false

[conversation]
playback_timeout_secs = 30
max_concurrent_synthesis = 2
max_group_turns = 9

[character]
conf_uid = "mao_pro"
name = "Mao"
human_name = "Ari"
"#,
        );

        assert!(!config.divider.faster_first_response);
        assert_eq!(config.divider.segment_method, SegmentMethod::Regex);
        assert_eq!(config.divider.valid_tags, vec!["think".to_string(), "aside".to_string()]);
        assert!(!config.speech_filter.ignore_asterisks);
        assert!(config.speech_filter.ignore_brackets, "unset filters keep defaults");
        assert_eq!(config.conversation.playback_timeout_secs, 30);
        assert_eq!(config.conversation.max_concurrent_synthesis, 2);
        assert_eq!(config.conversation.max_group_turns, Some(9));
        assert_eq!(config.character.conf_uid, "mao_pro");
        assert_eq!(config.character.name, "Mao");
        assert_eq!(config.character.human_name, "Ari");
    }

    #[test]
    fn test_load_from_file_sets_source() {
        let file = toml_file("[conversation]\nthinking_text = \"Hmm...\"\n");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.conversation.thinking_text, "Hmm...");
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_file_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(Some(dir.path().join("absent.toml"))).unwrap();
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file("[divider\nvalid_tags = ");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = toml_file("[conversation]\nplayback_timeout_secs = 0\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let mut config = parse("[divider]\nvalid_tags = [\"not a tag\"]\n");
        assert!(config.validate().is_err());
        config.divider.valid_tags = vec!["inner-voice".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = parse("[character]\nname = \"Mao\"\n");
        let env: HashMap<&str, &str> = HashMap::from([
            ("CHORUS_CHARACTER_NAME", "Shizuku"),
            ("CHORUS_VALID_TAGS", "think, aside,"),
            ("CHORUS_SEGMENT_METHOD", "sideways"),
            ("CHORUS_PLAYBACK_TIMEOUT_SECS", "45"),
        ]);
        apply_env_config(&mut config, |k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.character.name, "Shizuku");
        assert_eq!(config.divider.valid_tags, vec!["think".to_string(), "aside".to_string()]);
        assert_eq!(config.divider.segment_method, SegmentMethod::Language, "bad value ignored");
        assert_eq!(config.conversation.playback_timeout_secs, 45);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_overrides_apply_last() {
        let mut config = ChorusConfig::default();
        ConfigOverrides::new()
            .with_max_group_turns(6)
            .with_character_name("Hiyori")
            .apply(&mut config)
            .unwrap();
        assert_eq!(config.conversation.max_group_turns, Some(6));
        assert_eq!(config.character.name, "Hiyori");
        assert_eq!(config.source(), ConfigSource::Override);

        let err = ConfigOverrides::new()
            .with_playback_timeout_secs(0)
            .apply(&mut config);
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_overrides_no_change() {
        let mut config = ChorusConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_output_pipeline_uses_character() {
        let config = parse("[character]\nname = \"Mao\"\n");
        let pipeline = config.output_pipeline(None, None);
        assert_eq!(
            pipeline.stage_names(),
            vec!["action_extractor", "display_formatter", "speech_filter"]
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ValidationError("bad".into());
        assert_eq!(err.to_string(), "Invalid configuration: bad");
    }
}
