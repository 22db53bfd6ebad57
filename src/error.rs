// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for colloquy.
//!
//! Vendor and storage failures are strongly typed with `thiserror`. Turn-level
//! failures distinguish the fatal case ([`TurnError`]) from the supplementary
//! warnings ([`TurnWarning`]) that ride along with a successful answer.
//! `anyhow` is used for propagation in the binary and other glue code.

use thiserror::Error;

/// Errors that can occur while talking to an LLM vendor.
///
/// Messages are already human readable: HTML error pages returned by proxies
/// are converted to text before the error is constructed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VendorError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {message}")]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Streaming error: {0}")]
    StreamError(String),

    /// The vendor answered with an error object instead of a completion.
    #[error("Vendor returned an error payload: {0}")]
    ErrorPayload(String),

    #[error("Empty text result, please check your prefill!")]
    EmptyResult,

    #[error("Empty stream object, please check your proxy connection!")]
    EmptyStream,

    #[error("Vendor not configured: {0}")]
    NotConfigured(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl VendorError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create an API error without status code.
    pub fn api_message(message: impl Into<String>) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: None,
        }
    }

    /// Whether the vendor produced nothing usable (as opposed to failing outright).
    pub fn is_empty_output(&self) -> bool {
        matches!(self, Self::EmptyResult | Self::EmptyStream)
    }

    /// Check if this is a rate limit error.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// A turn that could not produce an answer.
#[derive(Error, Debug)]
pub enum TurnError {
    /// The vendor kept failing until the retry budget ran out.
    #[error("Turn failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: VendorError,
    },

    #[error("Session is not configured, missing: {}", .missing.join(", "))]
    NotConfigured { missing: Vec<String> },

    /// The session was evicted while the turn waited for a slot.
    #[error("Session {0} is closed")]
    Closed(String),
}

impl TurnError {
    /// The vendor failure behind this error, if any.
    pub fn vendor_error(&self) -> Option<&VendorError> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::NotConfigured { .. } | Self::Closed(_) => None,
        }
    }
}

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Template limit reached ({limit} per session)")]
    TemplateLimit { limit: usize },

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// The transcript of a successful turn could not be saved.
#[derive(Error, Debug)]
#[error("Failed to persist transcript for session {session_id}: {source}")]
pub struct PersistenceError {
    pub session_id: String,
    #[source]
    pub source: StorageError,
}

/// The summary request behind a context compaction failed.
#[derive(Error, Debug)]
#[error("Context compaction failed after {attempts} attempt(s): {source}")]
pub struct CompactionError {
    pub attempts: u32,
    #[source]
    pub source: VendorError,
}

/// Non-fatal problems reported alongside a successful answer.
#[derive(Error, Debug)]
pub enum TurnWarning {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Compaction(#[from] CompactionError),
}

/// Errors reported by a message transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The transport could not parse the formatting entities of a message.
    #[error("Formatting rejected: {0}")]
    FormattingRejected(String),

    #[error("Message text is empty")]
    EmptyText,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Errors that can occur during configuration loading and editing.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_error_api() {
        let err = VendorError::api("Bad request", 400);
        match err {
            VendorError::ApiError { message, status_code } => {
                assert_eq!(message, "Bad request");
                assert_eq!(status_code, Some(400));
            }
            _ => panic!("Expected ApiError"),
        }
    }

    #[test]
    fn test_empty_output_messages() {
        assert!(VendorError::EmptyStream.is_empty_output());
        assert!(VendorError::EmptyResult.is_empty_output());
        assert!(!VendorError::StreamError("boom".into()).is_empty_output());
        assert!(VendorError::EmptyStream.to_string().contains("proxy"));
        assert!(VendorError::EmptyResult.to_string().contains("prefill"));
    }

    #[test]
    fn test_turn_error_display() {
        let err = TurnError::Failed {
            attempts: 3,
            source: VendorError::RateLimited("slow down".into()),
        };
        let display = err.to_string();
        assert!(display.contains("3 attempt"));
        assert!(display.contains("slow down"));
        assert!(err.vendor_error().is_some());

        let err = TurnError::NotConfigured {
            missing: vec!["api_key".into(), "model".into()],
        };
        assert_eq!(
            err.to_string(),
            "Session is not configured, missing: api_key, model"
        );
    }

    #[test]
    fn test_warning_is_transparent() {
        let warning: TurnWarning = CompactionError {
            attempts: 2,
            source: VendorError::EmptyResult,
        }
        .into();
        assert!(warning.to_string().starts_with("Context compaction failed"));
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let json_err = result.unwrap_err();
        let config_err: ConfigError = json_err.into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }
}
