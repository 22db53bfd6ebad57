// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`SessionConfig`] is the per-session settings object that is persisted with
//! the transcript and edited one parameter at a time. [`AppConfig`] holds the
//! process-wide settings read from the config file at startup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::error;

use crate::error::ConfigError;

/// Parameters that must be set before a session can talk to a vendor.
pub const MANDATORY_PARAMS: &[&str] = &["api_key", "model"];

/// Parameters hidden from everyone but the session owner.
pub const PRIVATE_PARAMS: &[&str] = &["api_key", "system_prompt", "base_url", "prefill_prompt"];

/// Every session parameter, in display order.
pub const PARAM_NAMES: &[&str] = &[
    "api_key",
    "system_prompt",
    "model",
    "vendor",
    "base_url",
    "vision",
    "stream_mode",
    "temperature",
    "max_tokens",
    "attempts",
    "threads_limit",
    "markdown_enable",
    "markdown_filter",
    "split_paragraphs",
    "reply_to_quotes",
    "show_used_tokens",
    "allow_config_everyone",
    "max_answer_len",
    "summarizer_limit",
    "summariser_prompt",
    "prefill_prompt",
    "prefill_mode",
];

const DEFAULT_SUMMARISER_PROMPT: &str =
    "Create a short summary of the text previously discussed with the user.";

/// Which vendor family a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VendorKind {
    /// Completion-style chat API.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Message-style API with optional streaming.
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl FromStr for VendorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            _ => Err(ConfigError::invalid(
                "vendor",
                "can only be \"openai\" or \"anthropic\"",
            )),
        }
    }
}

impl fmt::Display for VendorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Where the prefill text goes in an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrefillMode {
    /// Trailing assistant message that seeds the completion.
    #[default]
    Assistant,
    /// Spliced before the new user text.
    PreUser,
    /// Spliced after the new user text.
    PostUser,
}

impl FromStr for PrefillMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "assistant" => Ok(Self::Assistant),
            "pre-user" => Ok(Self::PreUser),
            "post-user" => Ok(Self::PostUser),
            _ => Err(ConfigError::invalid(
                "prefill_mode",
                "can only be \"assistant\", \"pre-user\" or \"post-user\"",
            )),
        }
    }
}

impl fmt::Display for PrefillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assistant => write!(f, "assistant"),
            Self::PreUser => write!(f, "pre-user"),
            Self::PostUser => write!(f, "post-user"),
        }
    }
}

/// Settings for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub vendor: VendorKind,
    pub base_url: Option<String>,
    /// Attach images to turns and keep them in recent history.
    pub vision: bool,
    /// Use the streaming endpoint (message-style vendor only).
    pub stream_mode: bool,
    pub temperature: f32,
    /// Maximum output tokens per vendor call.
    pub max_tokens: u32,
    /// Vendor calls per request before giving up (1..=10).
    pub attempts: u32,
    /// Concurrent turns per session (1..=10).
    pub threads_limit: u32,
    pub markdown_enable: bool,
    /// Strip `*` and backticks when markdown is not rendered.
    pub markdown_filter: bool,
    pub split_paragraphs: bool,
    pub reply_to_quotes: bool,
    pub show_used_tokens: bool,
    pub allow_config_everyone: bool,
    /// Maximum characters per delivered chunk.
    pub max_answer_len: u32,
    /// Token total at which the transcript gets compacted.
    pub summarizer_limit: u32,
    pub summariser_prompt: String,
    pub prefill_prompt: Option<String>,
    pub prefill_mode: PrefillMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            system_prompt: None,
            model: None,
            vendor: VendorKind::OpenAi,
            base_url: None,
            vision: false,
            stream_mode: false,
            temperature: 0.5,
            max_tokens: 4096,
            attempts: 7,
            threads_limit: 10,
            markdown_enable: true,
            markdown_filter: true,
            split_paragraphs: false,
            reply_to_quotes: true,
            show_used_tokens: true,
            allow_config_everyone: false,
            max_answer_len: 2000,
            summarizer_limit: 12000,
            summariser_prompt: DEFAULT_SUMMARISER_PROMPT.to_string(),
            prefill_prompt: None,
            prefill_mode: PrefillMode::Assistant,
        }
    }
}

impl SessionConfig {
    /// Names of mandatory parameters that are not set.
    pub fn missing_params(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if is_unset(&self.api_key) {
            missing.push("api_key".to_string());
        }
        if is_unset(&self.model) {
            missing.push("model".to_string());
        }
        missing
    }

    /// The prefill text, if one is configured.
    pub fn prefill(&self) -> Option<&str> {
        self.prefill_prompt.as_deref().filter(|p| !p.is_empty())
    }

    /// The system prompt, if one is configured.
    pub fn system(&self) -> Option<&str> {
        self.system_prompt.as_deref().filter(|p| !p.is_empty())
    }

    /// Check every range constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_temperature(self.temperature)?;
        check_range("attempts", self.attempts, 1, 10)?;
        check_range("threads_limit", self.threads_limit, 1, 10)?;
        check_min("max_answer_len", self.max_answer_len, 50)?;
        check_min("summarizer_limit", self.summarizer_limit, 1000)?;
        check_min("max_tokens", self.max_tokens, 1)?;
        if self.summariser_prompt.trim().is_empty() {
            return Err(ConfigError::invalid("summariser_prompt", "must not be empty"));
        }
        Ok(())
    }

    /// Set one parameter from user-supplied text.
    ///
    /// Names may use `-` or `_`. Optional string parameters are cleared by an
    /// empty value or `none`. Nothing changes when validation fails.
    pub fn set_param(&mut self, name: &str, raw: &str) -> Result<(), ConfigError> {
        let name = name.trim().replace('-', "_");
        let raw = raw.trim();

        match name.as_str() {
            "api_key" => self.api_key = optional_text(raw),
            "system_prompt" => self.system_prompt = optional_text(raw),
            "model" => self.model = optional_text(raw),
            "base_url" => self.base_url = optional_text(raw),
            "prefill_prompt" => self.prefill_prompt = optional_text(raw),
            "summariser_prompt" => {
                if raw.is_empty() {
                    return Err(ConfigError::invalid(&name, "must not be empty"));
                }
                self.summariser_prompt = raw.to_string();
            }
            "vendor" => self.vendor = raw.parse()?,
            "prefill_mode" => self.prefill_mode = raw.parse()?,
            "vision" => self.vision = parse_bool(&name, raw)?,
            "stream_mode" => self.stream_mode = parse_bool(&name, raw)?,
            "markdown_enable" => self.markdown_enable = parse_bool(&name, raw)?,
            "markdown_filter" => self.markdown_filter = parse_bool(&name, raw)?,
            "split_paragraphs" => self.split_paragraphs = parse_bool(&name, raw)?,
            "reply_to_quotes" => self.reply_to_quotes = parse_bool(&name, raw)?,
            "show_used_tokens" => self.show_used_tokens = parse_bool(&name, raw)?,
            "allow_config_everyone" => self.allow_config_everyone = parse_bool(&name, raw)?,
            "temperature" => {
                let value: f32 = raw
                    .replace(',', ".")
                    .parse()
                    .map_err(|_| ConfigError::invalid(&name, "is not a number"))?;
                check_temperature(value)?;
                self.temperature = value;
            }
            "attempts" => {
                let value = parse_uint(&name, raw)?;
                check_range(&name, value, 1, 10)?;
                self.attempts = value;
            }
            "threads_limit" => {
                let value = parse_uint(&name, raw)?;
                check_range(&name, value, 1, 10)?;
                self.threads_limit = value;
            }
            "max_answer_len" => {
                let value = parse_uint(&name, raw)?;
                check_min(&name, value, 50)?;
                self.max_answer_len = value;
            }
            "summarizer_limit" => {
                let value = parse_uint(&name, raw)?;
                check_min(&name, value, 1000)?;
                self.summarizer_limit = value;
            }
            "max_tokens" => {
                let value = parse_uint(&name, raw)?;
                check_min(&name, value, 1)?;
                self.max_tokens = value;
            }
            _ => return Err(ConfigError::UnknownParameter(name)),
        }
        Ok(())
    }

    /// Render every parameter for display, hiding private values unless
    /// `show_private` is set.
    pub fn redacted(&self, show_private: bool) -> Vec<(&'static str, String)> {
        let value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };

        PARAM_NAMES
            .iter()
            .map(|&name| {
                let text = match value.get(name) {
                    None | Some(serde_json::Value::Null) => "not set".to_string(),
                    Some(_) if PRIVATE_PARAMS.contains(&name) && !show_private => {
                        "set, hidden".to_string()
                    }
                    Some(serde_json::Value::String(s)) if name == "api_key" => mask_key(s),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                (name, text)
            })
            .collect()
    }
}

fn is_unset(value: &Option<String>) -> bool {
    value.as_deref().map(str::is_empty).unwrap_or(true)
}

fn optional_text(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(raw.to_string())
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::invalid(name, "can only be \"true\" or \"false\"")),
    }
}

fn parse_uint(name: &str, raw: &str) -> Result<u32, ConfigError> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::invalid(name, "is not an integer"));
    }
    raw.parse()
        .map_err(|_| ConfigError::invalid(name, "is not an integer"))
}

fn check_temperature(value: f32) -> Result<(), ConfigError> {
    if (0.0..=2.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid("temperature", "must be between 0 and 2"))
    }
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            name,
            format!("must be between {} and {}", min, max),
        ))
    }
}

fn check_min(name: &str, value: u32, min: u32) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("must be at least {}", min)))
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 10 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 6), tail)
    } else {
        "*".repeat(chars.len())
    }
}

// ============================================================================
// Application Config
// ============================================================================

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file; defaults to `~/.colloquy/sessions.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Log raw requests and responses around vendor calls.
    pub full_debug: bool,

    /// Pause between chunks of one answer.
    pub chunk_delay_ms: u64,

    /// HTTP timeout for vendor calls.
    pub request_timeout_secs: u64,

    pub inline_cache_ttl_secs: u64,
    pub inline_sweep_interval_secs: u64,

    /// Settings applied to sessions seen for the first time.
    #[serde(deserialize_with = "lenient_session_defaults")]
    pub session_defaults: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            full_debug: false,
            chunk_delay_ms: 3000,
            request_timeout_secs: 300,
            inline_cache_ttl_secs: 86_400,
            inline_sweep_interval_secs: 3600,
            session_defaults: SessionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            super::loader::get_global_config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sessions.db")
        })
    }
}

/// Accept any shape for the session defaults and fall back to the built-in
/// ones when it does not parse or validate.
fn lenient_session_defaults<'de, D>(deserializer: D) -> Result<SessionConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = serde_json::from_value::<SessionConfig>(value)
        .map_err(ConfigError::from)
        .and_then(|config| config.validate().map(|_| config));

    match parsed {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Invalid session defaults, using built-in defaults: {}", e);
            Ok(SessionConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.missing_params(), vec!["api_key", "model"]);
        assert_eq!(config.attempts, 7);
        assert_eq!(config.summarizer_limit, 12000);
    }

    #[test]
    fn test_serde_names() {
        let mut config = SessionConfig::default();
        config.prefill_mode = PrefillMode::PostUser;
        config.vendor = VendorKind::Anthropic;
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["prefill_mode"], "post-user");
        assert_eq!(json["vendor"], "anthropic");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"model": "gpt-4o", "api_key": "k"}"#).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.threads_limit, 10);
        assert!(config.missing_params().is_empty());
    }

    #[test]
    fn test_set_param_accepts_valid_values() {
        let mut config = SessionConfig::default();
        config.set_param("temperature", "1,5").unwrap();
        assert_eq!(config.temperature, 1.5);
        config.set_param("threads-limit", "3").unwrap();
        assert_eq!(config.threads_limit, 3);
        config.set_param("vision", "TRUE").unwrap();
        assert!(config.vision);
        config.set_param("prefill_mode", "pre-user").unwrap();
        assert_eq!(config.prefill_mode, PrefillMode::PreUser);
        config.set_param("model", "claude").unwrap();
        config.set_param("model", "none").unwrap();
        assert_eq!(config.model, None);
    }

    #[test]
    fn test_set_param_rejects_invalid_values() {
        let mut config = SessionConfig::default();
        let before = config.clone();

        assert!(config.set_param("temperature", "2.5").is_err());
        assert!(config.set_param("temperature", "warm").is_err());
        assert!(config.set_param("attempts", "0").is_err());
        assert!(config.set_param("attempts", "11").is_err());
        assert!(config.set_param("attempts", "-1").is_err());
        assert!(config.set_param("max_answer_len", "49").is_err());
        assert!(config.set_param("summarizer_limit", "999").is_err());
        assert!(config.set_param("vendor", "ollama").is_err());
        assert!(config.set_param("prefill_mode", "system").is_err());
        assert!(config.set_param("markdown_enable", "yes").is_err());
        assert!(matches!(
            config.set_param("colour", "red"),
            Err(ConfigError::UnknownParameter(_))
        ));

        assert_eq!(config, before);
    }

    #[test]
    fn test_validate_catches_out_of_range() {
        let config = SessionConfig {
            threads_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_private_values() {
        let config = SessionConfig {
            api_key: Some("sk-abcdefghijkl".to_string()),
            model: Some("gpt-4o".to_string()),
            ..Default::default()
        };

        let hidden = config.redacted(false);
        let lookup = |rows: &[(&str, String)], key: &str| {
            rows.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone()).unwrap()
        };
        assert_eq!(lookup(&hidden, "api_key"), "set, hidden");
        assert_eq!(lookup(&hidden, "system_prompt"), "not set");
        assert_eq!(lookup(&hidden, "model"), "gpt-4o");
        assert_eq!(lookup(&hidden, "vision"), "false");

        let shown = config.redacted(true);
        assert_eq!(lookup(&shown, "api_key"), "sk-*********jkl");
        assert_eq!(shown.len(), PARAM_NAMES.len());
    }

    #[test]
    fn test_invalid_session_defaults_fall_back() {
        let config: AppConfig = serde_json::from_str(
            r#"{"full_debug": true, "session_defaults": {"attempts": 50}}"#,
        )
        .unwrap();
        assert!(config.full_debug);
        assert_eq!(config.session_defaults, SessionConfig::default());

        let config: AppConfig =
            serde_json::from_str(r#"{"session_defaults": {"attempts": 2}}"#).unwrap();
        assert_eq!(config.session_defaults.attempts, 2);
        assert_eq!(config.chunk_delay_ms, 3000);
    }
}
