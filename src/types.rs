// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for colloquy.
//!
//! This module defines the normalized conversation model shared by every
//! component: messages and their multimodal parts, token usage counters, the
//! reply returned by a vendor call, and the [`Vendor`] trait itself.
//!
//! Vendor-specific wire shapes never appear here. Adapters in
//! [`crate::providers`] translate to and from these types at dispatch time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VendorError;

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Supported image media types for vision turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageMediaType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/gif")]
    Gif,
    #[serde(rename = "image/webp")]
    Webp,
}

impl ImageMediaType {
    /// The MIME string for this media type.
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

impl fmt::Display for ImageMediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

impl FromStr for ImageMediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Ok(Self::Jpeg),
            "image/png" => Ok(Self::Png),
            "image/gif" => Ok(Self::Gif),
            "image/webp" => Ok(Self::Webp),
            other => Err(format!("Unsupported image type: {}", other)),
        }
    }
}

/// One typed part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Base64-encoded image data.
    Image { mime: ImageMediaType, data: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(mime: ImageMediaType, data: impl Into<String>) -> Self {
        Self::Image {
            mime,
            data: data.into(),
        }
    }
}

/// Message content - either a simple string or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        MessageContent::Parts(parts)
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a user message with text content.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a system message with text content.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a message with multimodal parts.
    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    /// Get text content if this message has simple text content.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }

    /// Concatenated text of the message, ignoring image parts.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Character length of the text parts only.
    pub fn text_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(s) => s.chars().count(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.chars().count(),
                    ContentPart::Image { .. } => 0,
                })
                .sum(),
        }
    }

    pub fn has_images(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => {
                parts.iter().any(|p| matches!(p, ContentPart::Image { .. }))
            }
        }
    }

    /// Collapse multimodal content back to plain text, dropping images.
    pub fn strip_images(&mut self) {
        if let MessageContent::Parts(_) = self.content {
            self.content = MessageContent::Text(self.text());
        }
    }
}

/// Ordered message history of a session.
pub type Transcript = Vec<Message>;

/// Strip image parts from every message except the newest `keep_last`.
///
/// Pass `0` to scrub the whole transcript.
pub fn scrub_images(messages: &mut [Message], keep_last: usize) {
    let cutoff = messages.len().saturating_sub(keep_last);
    for message in &mut messages[..cutoff] {
        message.strip_images();
    }
}

// ============================================================================
// Vendor Response Types
// ============================================================================

/// Token usage reported by a vendor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Build usage counters; a vendor-reported total wins over `input + output`.
    pub fn new(input_tokens: u32, output_tokens: u32, total_tokens: Option<u32>) -> Self {
        Self {
            total_tokens: total_tokens.unwrap_or(input_tokens + output_tokens),
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.total_tokens
    }
}

/// Normalized result of a successful vendor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorReply {
    pub text: String,
    pub usage: TokenUsage,
}

impl VendorReply {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

// ============================================================================
// Vendor Trait
// ============================================================================

/// An LLM vendor bound to one session's configuration.
///
/// Implementations own the model, credentials, system prompt and prefill
/// settings, so a call only needs the message list. They are selected once
/// per session (see [`crate::providers::create_vendor`]).
#[async_trait]
pub trait Vendor: Send + Sync {
    /// Send the messages and return the normalized answer.
    ///
    /// Fails with a [`VendorError`] whose message is already human readable.
    async fn dispatch(&self, messages: &[Message]) -> Result<VendorReply, VendorError>;

    /// Vendor name, used in logs and metrics.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Whether calls are served through the streaming endpoint.
    fn is_streaming(&self) -> bool {
        false
    }
}

/// A boxed vendor for dynamic dispatch.
pub type BoxedVendor = Box<dyn Vendor>;

/// A shared vendor handle held by a session.
pub type SharedVendor = Arc<dyn Vendor>;

#[cfg(test)]
mod tests {
    use super::*;

    fn photo_turn(text: &str) -> Message {
        Message::with_parts(
            Role::User,
            vec![
                ContentPart::image(ImageMediaType::Jpeg, "aGVsbG8="),
                ContentPart::text(text),
            ],
        )
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("Hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"Hello"}"#);

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_parts_serialization_shape() {
        let json = serde_json::to_value(photo_turn("look")).unwrap();
        assert_eq!(json["content"][0]["type"], "image");
        assert_eq!(json["content"][0]["mime"], "image/jpeg");
        assert_eq!(json["content"][1]["type"], "text");
        assert_eq!(json["content"][1]["text"], "look");
    }

    #[test]
    fn test_text_len_ignores_images() {
        let msg = photo_turn("héllo");
        assert_eq!(msg.text_len(), 5);
        assert_eq!(msg.text(), "héllo");
        assert!(msg.has_images());
    }

    #[test]
    fn test_strip_images() {
        let mut msg = photo_turn("caption");
        msg.strip_images();
        assert_eq!(msg.as_text(), Some("caption"));
        assert!(!msg.has_images());
    }

    #[test]
    fn test_scrub_images_keeps_recent() {
        let mut transcript: Transcript = (0..12).map(|i| photo_turn(&format!("m{}", i))).collect();
        scrub_images(&mut transcript, 10);
        assert!(!transcript[0].has_images());
        assert!(!transcript[1].has_images());
        assert!(transcript[2..].iter().all(Message::has_images));

        scrub_images(&mut transcript, 0);
        assert!(transcript.iter().all(|m| !m.has_images()));
    }

    #[test]
    fn test_token_usage_total() {
        assert_eq!(TokenUsage::new(10, 5, None).total(), 15);
        assert_eq!(TokenUsage::new(10, 5, Some(42)).total(), 42);
    }

    #[test]
    fn test_media_type_parse() {
        assert_eq!("image/webp".parse::<ImageMediaType>(), Ok(ImageMediaType::Webp));
        assert_eq!("IMAGE/JPG".parse::<ImageMediaType>(), Ok(ImageMediaType::Jpeg));
        assert!("text/plain".parse::<ImageMediaType>().is_err());
    }
}
