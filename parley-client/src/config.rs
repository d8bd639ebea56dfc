//! Configuration loading for Parley.
//!
//! Configuration is loaded from a TOML file (default: `parley.toml`). Every
//! field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::{ConversationMode, TurnMode, VadConfig};
use parley_types::{SessionConfig, ToolDefinition, TranscriptionConfig, TurnDetection};
use serde::Deserialize;

/// Root configuration for a conversation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationConfig {
    /// Remote service endpoints.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Models and session settings.
    #[serde(default)]
    pub session: SessionSettings,
    /// Turn-taking settings.
    #[serde(default)]
    pub turn: TurnSettings,
}

/// Remote service endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// WebSocket endpoint for audio mode.
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
    /// HTTP endpoint for text mode.
    #[serde(default = "default_responses_url")]
    pub responses_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Connect timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Models and session settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Model for audio mode.
    #[serde(default = "default_realtime_model")]
    pub realtime_model: String,
    /// Model for text mode.
    #[serde(default = "default_text_model")]
    pub text_model: String,
    /// System instructions for both modes.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Output voice for audio mode.
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Transcription model for user audio; empty disables transcription.
    #[serde(default = "default_transcription_model")]
    pub input_transcription_model: Option<String>,
    /// Mode to start in.
    #[serde(default)]
    pub initial_mode: ConversationMode,
}

/// Name of a turn mode in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TurnModeName {
    /// Server VAD.
    #[default]
    Automatic,
    /// Caller-driven, with optional timeout.
    Manual,
    /// No turn management.
    Disabled,
}

/// Turn-taking settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnSettings {
    /// Turn mode.
    #[serde(default)]
    pub mode: TurnModeName,
    /// Manual mode: end the user's turn this long after they stop speaking.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Automatic mode: VAD threshold (default: 0.5).
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Automatic mode: padding before speech (default: 300).
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    /// Automatic mode: silence that ends a turn (default: 500).
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

// Default value functions
fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_responses_url() -> String {
    "https://api.openai.com/v1/responses".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_text_model() -> String {
    "gpt-4o".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_transcription_model() -> Option<String> {
    Some("whisper-1".to_string())
}

fn default_threshold() -> f32 {
    0.5
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    500
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            realtime_url: default_realtime_url(),
            responses_url: default_responses_url(),
            api_key_env: default_api_key_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            realtime_model: default_realtime_model(),
            text_model: default_text_model(),
            instructions: None,
            voice: default_voice(),
            input_transcription_model: default_transcription_model(),
            initial_mode: ConversationMode::default(),
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            mode: TurnModeName::default(),
            timeout_ms: None,
            threshold: default_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

impl SessionSettings {
    /// Transcription model, treating an empty name as none.
    pub fn transcription_model(&self) -> Option<&str> {
        self.input_transcription_model
            .as_deref()
            .filter(|model| !model.is_empty())
    }
}

impl ServiceConfig {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ConversationConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.realtime_url.is_empty() {
            return Err(invalid("service.realtime_url", "must not be empty"));
        }
        if self.service.responses_url.is_empty() {
            return Err(invalid("service.responses_url", "must not be empty"));
        }
        if self.service.connect_timeout_secs == 0 {
            return Err(invalid("service.connect_timeout_secs", "must be positive"));
        }
        if self.session.realtime_model.is_empty() || self.session.text_model.is_empty() {
            return Err(invalid("session", "model names must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.turn.threshold) {
            return Err(invalid("turn.threshold", "must be between 0.0 and 1.0"));
        }
        if self.turn.timeout_ms == Some(0) {
            return Err(invalid("turn.timeout_ms", "must be positive"));
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let var = &self.service.api_key_env;
        match std::env::var(var) {
            Ok(key) if !key.is_empty() => Ok(Credentials::new(key)),
            _ => Err(ConfigError::MissingKey { var: var.clone() }),
        }
    }

    /// Turn mode described by the `[turn]` section.
    pub fn turn_mode(&self) -> TurnMode {
        match self.turn.mode {
            TurnModeName::Automatic => TurnMode::Automatic(VadConfig {
                threshold: self.turn.threshold,
                prefix_padding_ms: self.turn.prefix_padding_ms,
                silence_duration_ms: self.turn.silence_duration_ms,
            }),
            TurnModeName::Manual => TurnMode::Manual {
                timeout: self.turn.timeout_ms.map(Duration::from_millis),
            },
            TurnModeName::Disabled => TurnMode::Disabled,
        }
    }

    /// Session settings for a duplex session.
    pub fn session_config(&self, tools: Vec<ToolDefinition>, turn_mode: &TurnMode) -> SessionConfig {
        SessionConfig {
            instructions: self.session.instructions.clone(),
            voice: Some(self.session.voice.clone()),
            modalities: vec!["text".to_string(), "audio".to_string()],
            tools,
            input_audio_transcription: self.session.transcription_model().map(|model| {
                TranscriptionConfig {
                    model: model.to_string(),
                }
            }),
            turn_detection: turn_mode.vad().map(|vad| {
                TurnDetection::server_vad(vad.threshold, vad.prefix_padding_ms, vad.silence_duration_ms)
            }),
        }
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Wrap an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// The raw key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &format!("[{} bytes REDACTED]", self.api_key.len()))
            .finish()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The API key variable is unset or empty.
    #[error("environment variable {var} is not set")]
    MissingKey {
        /// Variable name.
        var: String,
    },
}
