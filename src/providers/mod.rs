// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! LLM vendor adapters for colloquy.
//!
//! This module provides implementations of the [`Vendor`](crate::types::Vendor) trait for the two
//! supported API families:
//!
//! - [`openai::OpenAIVendor`] - completion-style Chat Completions API (and
//!   any compatible endpoint reachable through `base_url`)
//! - [`anthropic::AnthropicVendor`] - message-style Messages API, single-shot
//!   or streamed
//!
//! A session picks its adapter once, from its config:
//!
//! ```rust,ignore
//! use colloquy::providers::create_vendor;
//!
//! let vendor = create_vendor(&session_config, &app_config)?;
//! let reply = vendor.dispatch(&messages).await?;
//! ```

pub mod anthropic;
pub mod openai;
pub mod stream;

pub use anthropic::AnthropicVendor;
pub use openai::OpenAIVendor;
pub use stream::{aggregate, SseDecoder, SseFrame, StreamAggregator, StreamEvent};

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::config::{AppConfig, PrefillMode, SessionConfig, VendorKind};
use crate::error::VendorError;
use crate::types::{ContentPart, Message, MessageContent, Role, SharedVendor};

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Prefill text and where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefill {
    pub text: String,
    pub mode: PrefillMode,
}

/// Everything an adapter needs, resolved from a session config.
#[derive(Debug, Clone)]
pub struct VendorSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prefill: Option<Prefill>,
    /// Use the streaming endpoint where the vendor has one.
    pub stream: bool,
    pub timeout: Duration,
    /// Log the raw response body and error details on failure.
    pub full_debug: bool,
}

impl VendorSettings {
    /// Resolve settings, failing when the key or model is missing.
    pub fn from_config(config: &SessionConfig, app: &AppConfig) -> Result<Self, VendorError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VendorError::NotConfigured("API key required".to_string()))?;
        let model = config
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| VendorError::NotConfigured("model required".to_string()))?;

        let default_url = match config.vendor {
            VendorKind::OpenAi => OPENAI_BASE_URL,
            VendorKind::Anthropic => ANTHROPIC_BASE_URL,
        };
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(default_url)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            api_key,
            model,
            base_url,
            system_prompt: config.system().map(String::from),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            prefill: config.prefill().map(|text| Prefill {
                text: text.to_string(),
                mode: config.prefill_mode,
            }),
            stream: config.stream_mode,
            timeout: Duration::from_secs(app.request_timeout_secs.max(1)),
            full_debug: app.full_debug,
        })
    }

    /// Build an HTTP client honouring the configured timeout.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client, VendorError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| VendorError::NotConfigured(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Create the adapter for a session's vendor.
pub fn create_vendor(config: &SessionConfig, app: &AppConfig) -> Result<SharedVendor, VendorError> {
    let settings = VendorSettings::from_config(config, app)?;
    match config.vendor {
        VendorKind::OpenAi => Ok(Arc::new(OpenAIVendor::new(settings)?)),
        VendorKind::Anthropic => Ok(Arc::new(AnthropicVendor::new(settings)?)),
    }
}

/// Turn an error text into something readable, converting HTML pages
/// (typically from proxies and gateways) to plain text.
pub fn humanize(text: &str) -> String {
    if !text.contains("html>") {
        return text.to_string();
    }
    match html2text::from_read(text.as_bytes(), 100) {
        Ok(plain) => plain.trim().to_string(),
        Err(_) => text.to_string(),
    }
}

/// Apply the prefill to an outgoing message list.
///
/// `Assistant` appends a trailing assistant message; the user modes splice the
/// text into the last user message. The input slice is never modified.
pub fn apply_prefill(messages: &[Message], prefill: Option<&Prefill>) -> Vec<Message> {
    let mut outgoing = messages.to_vec();
    let prefill = match prefill {
        Some(p) => p,
        None => return outgoing,
    };

    match prefill.mode {
        PrefillMode::Assistant => outgoing.push(Message::assistant(prefill.text.clone())),
        PrefillMode::PreUser | PrefillMode::PostUser => {
            if let Some(target) = outgoing.iter_mut().rev().find(|m| m.role == Role::User) {
                splice_text(target, &prefill.text, prefill.mode == PrefillMode::PreUser);
            }
        }
    }
    outgoing
}

fn splice_text(message: &mut Message, prefill: &str, before: bool) {
    let join = |text: &str| {
        if before {
            format!("{}\n{}", prefill, text)
        } else {
            format!("{}\n{}", text, prefill)
        }
    };

    match &mut message.content {
        MessageContent::Text(text) => *text = join(text.as_str()),
        MessageContent::Parts(parts) => {
            let slot = if before {
                parts.iter_mut().find(|p| matches!(p, ContentPart::Text { .. }))
            } else {
                parts.iter_mut().rev().find(|p| matches!(p, ContentPart::Text { .. }))
            };
            match slot {
                Some(ContentPart::Text { text }) => *text = join(text.as_str()),
                _ => parts.push(ContentPart::text(prefill)),
            }
        }
    }
}

/// Log a failed vendor call before it is raised.
pub(crate) fn log_failure(vendor: &str, err: &VendorError, raw: Option<&str>, full_debug: bool) {
    error!(vendor = vendor, "{} API request error: {}", vendor.to_uppercase(), err);
    if full_debug {
        error!(vendor = vendor, "Error details: {:?}", err);
        error!(
            vendor = vendor,
            "Raw response: {}",
            raw.unwrap_or("The response object was not received.")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageMediaType;

    fn configured(vendor: VendorKind) -> SessionConfig {
        SessionConfig {
            api_key: Some("key".to_string()),
            model: Some("model-x".to_string()),
            vendor,
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_require_key_and_model() {
        let app = AppConfig::default();
        let err = VendorSettings::from_config(&SessionConfig::default(), &app).unwrap_err();
        assert!(matches!(err, VendorError::NotConfigured(_)));

        let settings = VendorSettings::from_config(&configured(VendorKind::OpenAi), &app).unwrap();
        assert_eq!(settings.base_url, OPENAI_BASE_URL);
        assert_eq!(settings.prefill, None);
        assert_eq!(settings.system_prompt, None);
    }

    #[test]
    fn test_settings_trim_base_url() {
        let mut config = configured(VendorKind::Anthropic);
        config.base_url = Some("http://proxy.local/".to_string());
        let settings = VendorSettings::from_config(&config, &AppConfig::default()).unwrap();
        assert_eq!(settings.base_url, "http://proxy.local");
    }

    #[test]
    fn test_create_vendor_picks_variant() {
        let app = AppConfig::default();
        let vendor = create_vendor(&configured(VendorKind::OpenAi), &app).unwrap();
        assert_eq!(vendor.name(), "openai");

        let mut config = configured(VendorKind::Anthropic);
        config.stream_mode = true;
        let vendor = create_vendor(&config, &app).unwrap();
        assert_eq!(vendor.name(), "anthropic");
        assert!(vendor.is_streaming());
        assert_eq!(vendor.model(), "model-x");
    }

    #[test]
    fn test_humanize_html() {
        assert_eq!(humanize("plain failure"), "plain failure");
        let page = "<html><body><h1>502 Bad Gateway</h1></body></html>";
        let text = humanize(page);
        assert!(text.contains("502 Bad Gateway"));
        assert!(!text.contains("<h1>"));
    }

    #[test]
    fn test_prefill_assistant_mode() {
        let messages = vec![Message::user("hi")];
        let prefill = Prefill {
            text: "Sure,".to_string(),
            mode: PrefillMode::Assistant,
        };
        let outgoing = apply_prefill(&messages, Some(&prefill));
        assert_eq!(outgoing.len(), 2);
        assert_eq!(outgoing[1], Message::assistant("Sure,"));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_prefill_user_modes_splice_last_user() {
        let messages = vec![
            Message::user("first"),
            Message::assistant("ok"),
            Message::user("second"),
        ];
        let pre = Prefill {
            text: "[be brief]".to_string(),
            mode: PrefillMode::PreUser,
        };
        let outgoing = apply_prefill(&messages, Some(&pre));
        assert_eq!(outgoing.len(), 3);
        assert_eq!(outgoing[2].as_text(), Some("[be brief]\nsecond"));
        assert_eq!(outgoing[0].as_text(), Some("first"));

        let post = Prefill {
            text: "[be brief]".to_string(),
            mode: PrefillMode::PostUser,
        };
        let outgoing = apply_prefill(&messages, Some(&post));
        assert_eq!(outgoing[2].as_text(), Some("second\n[be brief]"));
    }

    #[test]
    fn test_prefill_splices_text_part_of_image_turn() {
        let messages = vec![Message::with_parts(
            Role::User,
            vec![
                ContentPart::image(ImageMediaType::Png, "AAAA"),
                ContentPart::text("what is this"),
            ],
        )];
        let post = Prefill {
            text: "answer in French".to_string(),
            mode: PrefillMode::PostUser,
        };
        let outgoing = apply_prefill(&messages, Some(&post));
        assert_eq!(outgoing[0].text(), "what is this\nanswer in French");
        assert!(outgoing[0].has_images());
    }
}
