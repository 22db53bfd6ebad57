// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message-style vendor adapter.
//!
//! This module provides a [`Vendor`] implementation for Anthropic's Messages
//! API, either single-shot or streamed over Server-Sent Events.
//!
//! # Features
//!
//! - The system prompt is a top-level `system` field, omitted when unset
//! - Images travel as structured `{type: image, source: {base64}}` blocks
//! - Streamed answers are folded by [`StreamAggregator`]
//! - Leading spaces and newlines the API sometimes emits are stripped
//!
//! # API Reference
//!
//! See [Anthropic Messages API](https://docs.anthropic.com/en/api/messages) for details.

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

use super::openai::transport_error;
use super::stream::{SseDecoder, SseFrame, StreamAggregator, StreamEvent};
use super::{apply_prefill, humanize, log_failure, VendorSettings};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const VENDOR_NAME: &str = "anthropic";

/// Message-style vendor.
pub struct AnthropicVendor {
    client: Client,
    settings: VendorSettings,
}

impl AnthropicVendor {
    /// Create a new adapter from resolved settings.
    pub fn new(settings: VendorSettings) -> Result<Self, VendorError> {
        Ok(Self {
            client: settings.http_client()?,
            settings,
        })
    }

    /// Build the request body for the Messages API.
    fn build_request(&self, messages: &[Message], stream: bool) -> AnthropicRequest {
        let outgoing = apply_prefill(messages, self.settings.prefill.as_ref());

        AnthropicRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            messages: outgoing.iter().map(ApiMessage::from).collect(),
            system: self.settings.system_prompt.clone(),
            temperature: self.settings.temperature,
            stream,
        }
    }

    fn post(&self, request: &AnthropicRequest) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.settings.base_url))
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
    }

    /// Handle an error response from the API.
    fn handle_error_response(status_code: u16, body: &str) -> VendorError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            let message = humanize(&error.error.message);
            match error.error.error_type.as_str() {
                "authentication_error" | "permission_error" => VendorError::AuthError(message),
                "rate_limit_error" | "overloaded_error" => VendorError::RateLimited(message),
                _ => VendorError::api(message, status_code),
            }
        } else {
            VendorError::api(humanize(body), status_code)
        }
    }

    /// Turn a successful single-shot body into a reply.
    fn parse_response(body: &str) -> Result<VendorReply, VendorError> {
        let response: ApiResponse =
            serde_json::from_str(body).map_err(|e| VendorError::ParseError(e.to_string()))?;

        let first_text = response
            .content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.clone())
            .unwrap_or_default();

        if response.id.contains("error") || response.response_type == "error" {
            let message = response
                .error
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(first_text);
            return Err(VendorError::ErrorPayload(humanize(&message)));
        }

        if first_text.trim().is_empty() {
            return Err(VendorError::EmptyResult);
        }

        let usage = response
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens, None))
            .unwrap_or_default();

        Ok(VendorReply::new(strip_leading_blanks(&first_text), usage))
    }

    /// Map one SSE frame to a normalized event.
    fn decode_event(frame: &SseFrame) -> StreamEvent {
        let event_type = if frame.event.is_empty() {
            serde_json::from_str::<EventEnvelope>(&frame.data)
                .map(|e| e.event_type)
                .unwrap_or_default()
        } else {
            frame.event.clone()
        };

        let parsed = match event_type.as_str() {
            "message_start" => serde_json::from_str::<MessageStartEvent>(&frame.data).map(|e| {
                StreamEvent::MessageStart {
                    input_tokens: e.message.usage.map(|u| u.input_tokens),
                }
            }),
            "content_block_delta" => {
                serde_json::from_str::<ContentBlockDeltaEvent>(&frame.data).map(|e| {
                    match e.delta.text {
                        Some(text) if e.delta.delta_type == "text_delta" => {
                            StreamEvent::ContentDelta(text)
                        }
                        _ => StreamEvent::Other,
                    }
                })
            }
            "message_delta" => serde_json::from_str::<MessageDeltaEvent>(&frame.data).map(|e| {
                StreamEvent::MessageDelta {
                    output_tokens: e.usage.map(|u| u.output_tokens).unwrap_or(0),
                }
            }),
            "error" => serde_json::from_str::<StreamErrorEvent>(&frame.data)
                .map(|e| StreamEvent::Error(humanize(&e.error.message))),
            _ => Ok(StreamEvent::Other),
        };

        parsed.unwrap_or_else(|e| {
            StreamEvent::Error(format!("Malformed {} event: {}", event_type, e))
        })
    }

    async fn send(&self, messages: &[Message]) -> Result<VendorReply, (VendorError, Option<String>)> {
        let request = self.build_request(messages, false);

        #[cfg(feature = "telemetry")]
        debug!(model = %self.settings.model, messages = request.messages.len(), "Sending chat request");

        let response = self
            .post(&request)
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

    async fn send_streaming(
        &self,
        messages: &[Message],
    ) -> Result<VendorReply, (VendorError, Option<String>)> {
        let request = self.build_request(messages, true);

        #[cfg(feature = "telemetry")]
        debug!(model = %self.settings.model, messages = request.messages.len(), "Sending streaming chat request");

        let mut response = self
            .post(&request)
            .send()
            .await
            .map_err(|e| (transport_error(e, &self.settings), None))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err((Self::handle_error_response(status.as_u16(), &body), Some(body)));
        }

        let mut decoder = SseDecoder::new();
        let mut aggregator = StreamAggregator::new();

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let partial = aggregator.text().to_string();
                    return Err((VendorError::StreamError(e.to_string()), Some(partial)));
                }
            };
            for frame in decoder.feed(&chunk) {
                let event = Self::decode_event(&frame);
                #[cfg(feature = "telemetry")]
                debug!(event = ?event, "Stream event");
                aggregator.feed(event);
            }
        }
        for frame in decoder.finish() {
            aggregator.feed(Self::decode_event(&frame));
        }

        let partial = aggregator.text().to_string();
        aggregator
            .finish()
            .map(|reply| VendorReply::new(strip_leading_blanks(&reply.text), reply.usage))
            .map_err(|e| (e, Some(partial)))
    }
}

/// Drop leading spaces and newlines.
fn strip_leading_blanks(text: &str) -> String {
    text.trim_start_matches([' ', '\n']).to_string()
}

#[async_trait]
impl Vendor for AnthropicVendor {
    async fn dispatch(&self, messages: &[Message]) -> Result<VendorReply, VendorError> {
        let start = Instant::now();
        let operation = if self.settings.stream {
            "anthropic.stream"
        } else {
            "anthropic.chat"
        };

        let result = if self.settings.stream {
            self.send_streaming(messages).await
        } else {
            self.send(messages).await
        };

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_vendor_call(operation, start.elapsed(), result.is_ok());
            if let Ok(ref reply) = result {
                GLOBAL_METRICS.record_tokens(
                    reply.usage.input_tokens as u64,
                    reply.usage.output_tokens as u64,
                );
            }
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = (start, operation);

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

    fn is_streaming(&self) -> bool {
        self.settings.stream
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Request body for the Messages API.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
    stream: bool,
}

/// API message format.
#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

/// Content can be a string or array of blocks.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

/// An outgoing content block.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text { text: String },
    Image { source: ApiImageSource },
}

/// Image source in API format.
#[derive(Debug, Serialize)]
struct ApiImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

/// API response format.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    response_type: String,
    #[serde(default)]
    content: Vec<ApiResponseBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// Token usage in API format.
#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

// ============================================================================
// Streaming Event Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
}

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageStartMessage,
}

#[derive(Debug, Deserialize)]
struct MessageStartMessage {
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    delta: ContentBlockDelta,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    #[serde(default)]
    usage: Option<MessageDeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamErrorEvent {
    error: ApiErrorDetail,
}

// ============================================================================
// Type Conversions
// ============================================================================

impl From<&Message> for ApiMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "user", // System messages become user messages in the API
        };

        let content = match &msg.content {
            MessageContent::Text(s) => ApiContent::Text(s.clone()),
            MessageContent::Parts(parts) => {
                ApiContent::Blocks(parts.iter().map(ApiContentBlock::from).collect())
            }
        };

        Self {
            role: role.to_string(),
            content,
        }
    }
}

impl From<&ContentPart> for ApiContentBlock {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => Self::Text { text: text.clone() },
            ContentPart::Image { mime, data } => Self::Image {
                source: ApiImageSource {
                    source_type: "base64".to_string(),
                    media_type: mime.as_mime().to_string(),
                    data: data.clone(),
                },
            },
        }
    }
}
