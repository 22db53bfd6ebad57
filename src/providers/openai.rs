// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Completion-style vendor adapter.
//!
//! Talks to the OpenAI Chat Completions API, or any compatible endpoint set
//! through `base_url`. The system prompt travels as a leading `system`
//! message; images are inlined as `data:` URIs next to the text part.
//!
//! # API Reference
//!
//! See [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[cfg(feature = "telemetry")]
use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::error::VendorError;
use crate::types::{ContentPart, Message, MessageContent, Role, TokenUsage, Vendor, VendorReply};

use super::{apply_prefill, humanize, log_failure, VendorSettings};

const VENDOR_NAME: &str = "openai";

/// Completion-style vendor.
pub struct OpenAIVendor {
    client: Client,
    settings: VendorSettings,
}

impl OpenAIVendor {
    /// Create a new adapter from resolved settings.
    pub fn new(settings: VendorSettings) -> Result<Self, VendorError> {
        Ok(Self {
            client: settings.http_client()?,
            settings,
        })
    }

    /// Build the request body: system prompt first, then the conversation
    /// with the prefill applied.
    fn build_request(&self, messages: &[Message]) -> ChatRequest {
        let mut api_messages: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 2);

        if let Some(system) = &self.settings.system_prompt {
            api_messages.push(ChatMessage {
                role: "system".to_string(),
                content: ChatContent::Text(system.clone()),
            });
        }

        let outgoing = apply_prefill(messages, self.settings.prefill.as_ref());
        api_messages.extend(outgoing.iter().map(ChatMessage::from));

        ChatRequest {
            model: self.settings.model.clone(),
            messages: api_messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: false,
        }
    }

    /// Map an error response to a [`VendorError`].
    fn handle_error_response(status_code: u16, body: &str) -> VendorError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            let message = humanize(&error.error.message);
            match error.error.error_type.as_deref() {
                Some("authentication_error") | Some("invalid_api_key") => {
                    VendorError::AuthError(message)
                }
                Some("rate_limit_error") | Some("rate_limit_exceeded") => {
                    VendorError::RateLimited(message)
                }
                _ => match status_code {
                    401 | 403 => VendorError::AuthError(message),
                    429 => VendorError::RateLimited(message),
                    _ => VendorError::api(message, status_code),
                },
            }
        } else {
            VendorError::api(humanize(body), status_code)
        }
    }

    /// Turn a successful HTTP body into a reply.
    fn parse_response(body: &str) -> Result<VendorReply, VendorError> {
        let response: ChatResponse =
            serde_json::from_str(body).map_err(|e| VendorError::ParseError(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(VendorError::ErrorPayload(humanize(&error.message)));
        }

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(VendorError::EmptyResult);
        }

        let usage = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens, u.total_tokens))
            .unwrap_or_default();

        Ok(VendorReply::new(text, usage))
    }

    async fn send(&self, request: &ChatRequest) -> Result<VendorReply, (VendorError, Option<String>)> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.settings.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.settings.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| (transport_error(e, &self.settings), None))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| (VendorError::NetworkError(e.to_string()), None))?;

        if !status.is_success() {
            return Err((Self::handle_error_response(status.as_u16(), &body), Some(body)));
        }

        Self::parse_response(&body).map_err(|e| (e, Some(body)))
    }
}

/// Classify a reqwest failure.
pub(crate) fn transport_error(err: reqwest::Error, settings: &VendorSettings) -> VendorError {
    if err.is_timeout() {
        VendorError::Timeout(settings.timeout.as_millis() as u64)
    } else {
        VendorError::NetworkError(humanize(&err.to_string()))
    }
}

#[async_trait]
impl Vendor for OpenAIVendor {
    async fn dispatch(&self, messages: &[Message]) -> Result<VendorReply, VendorError> {
        let request = self.build_request(messages);
        let start = Instant::now();

        #[cfg(feature = "telemetry")]
        debug!(model = %self.settings.model, messages = request.messages.len(), "Sending chat request");

        let result = self.send(&request).await;

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_vendor_call("openai.chat", start.elapsed(), result.is_ok());
            if let Ok(ref reply) = result {
                GLOBAL_METRICS.record_tokens(
                    reply.usage.input_tokens as u64,
                    reply.usage.output_tokens as u64,
                );
            }
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        result.map_err(|(err, raw)| {
            log_failure(VENDOR_NAME, &err, raw.as_deref(), self.settings.full_debug);
            err
        })
    }

    fn name(&self) -> &str {
        VENDOR_NAME
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Request body for Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

/// Chat message format.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: ChatContent,
}

/// Content can be a string or array of parts.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

/// A content part (text or image).
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ChatContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL for vision.
#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    /// Some gateways answer 200 with an error object.
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

/// A choice in the response.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Token usage.
#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

// ============================================================================
// Type Conversions
// ============================================================================

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };

        let content = match &msg.content {
            MessageContent::Text(s) => ChatContent::Text(s.clone()),
            MessageContent::Parts(parts) => {
                ChatContent::Parts(parts.iter().map(ChatContentPart::from).collect())
            }
        };

        Self {
            role: role.to_string(),
            content,
        }
    }
}

impl From<&ContentPart> for ChatContentPart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => Self::Text { text: text.clone() },
            ContentPart::Image { mime, data } => Self::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", mime.as_mime(), data),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrefillMode;
    use crate::providers::Prefill;
    use crate::types::ImageMediaType;
    use std::time::Duration;

    fn settings() -> VendorSettings {
        VendorSettings {
            api_key: "test-key".to_string(),
            model: "gpt-4o".to_string(),
            base_url: "http://localhost:1".to_string(),
            system_prompt: None,
            temperature: 0.5,
            max_tokens: 256,
            prefill: None,
            stream: false,
            timeout: Duration::from_secs(5),
            full_debug: false,
        }
    }

    #[test]
    fn test_vendor_creation() {
        let vendor = OpenAIVendor::new(settings()).unwrap();
        assert_eq!(vendor.name(), "openai");
        assert_eq!(vendor.model(), "gpt-4o");
        assert!(!vendor.is_streaming());
    }

    #[test]
    fn test_system_prompt_is_prepended() {
        let mut s = settings();
        s.system_prompt = Some("You are terse.".to_string());
        let vendor = OpenAIVendor::new(s).unwrap();

        let json = serde_json::to_value(vendor.build_request(&[Message::user("hi")])).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "You are terse.");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 256);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_no_system_message_without_prompt() {
        let vendor = OpenAIVendor::new(settings()).unwrap();
        let json = serde_json::to_value(vendor.build_request(&[Message::user("hi")])).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_prefill_appends_assistant_message() {
        let mut s = settings();
        s.prefill = Some(Prefill {
            text: "Certainly".to_string(),
            mode: PrefillMode::Assistant,
        });
        let vendor = OpenAIVendor::new(s).unwrap();
        let json = serde_json::to_value(vendor.build_request(&[Message::user("hi")])).unwrap();
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"], "Certainly");
    }

    #[test]
    fn test_image_becomes_data_uri() {
        let msg = Message::with_parts(
            Role::User,
            vec![
                ContentPart::image(ImageMediaType::Webp, "UklGRg=="),
                ContentPart::text("I sent a sticker"),
            ],
        );
        let json = serde_json::to_value(ChatMessage::from(&msg)).unwrap();
        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(
            json["content"][0]["image_url"]["url"],
            "data:image/webp;base64,UklGRg=="
        );
        assert_eq!(json["content"][1]["type"], "text");
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 16}
        }"#;
        let reply = OpenAIVendor::parse_response(body).unwrap();
        assert_eq!(reply.text, "Hello!");
        assert_eq!(reply.usage.input_tokens, 12);
        assert_eq!(reply.usage.output_tokens, 3);
        // The vendor's own total wins.
        assert_eq!(reply.usage.total(), 16);
    }

    #[test]
    fn test_parse_response_empty_text() {
        let body = r#"{"choices": [{"message": {"content": "   "}}]}"#;
        assert_eq!(
            OpenAIVendor::parse_response(body),
            Err(VendorError::EmptyResult)
        );
        let body = r#"{"choices": [{"message": {"content": null}}]}"#;
        assert_eq!(
            OpenAIVendor::parse_response(body),
            Err(VendorError::EmptyResult)
        );
    }

    #[test]
    fn test_parse_response_error_payload() {
        let body = r#"{"error": {"message": "upstream overloaded"}}"#;
        assert_eq!(
            OpenAIVendor::parse_response(body),
            Err(VendorError::ErrorPayload("upstream overloaded".to_string()))
        );
    }

    #[test]
    fn test_error_mapping() {
        let err = OpenAIVendor::handle_error_response(
            401,
            r#"{"error": {"message": "bad key", "type": "invalid_api_key"}}"#,
        );
        assert_eq!(err, VendorError::AuthError("bad key".to_string()));

        let err = OpenAIVendor::handle_error_response(429, r#"{"error": {"message": "slow"}}"#);
        assert!(err.is_rate_limited());

        let err = OpenAIVendor::handle_error_response(
            502,
            "<html><body><h1>Bad Gateway</h1></body></html>",
        );
        match err {
            VendorError::ApiError { message, status_code } => {
                assert!(message.contains("Bad Gateway"));
                assert!(!message.contains("<h1>"));
                assert_eq!(status_code, Some(502));
            }
            other => panic!("Expected ApiError, got {:?}", other),
        }
    }
}
