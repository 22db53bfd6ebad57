// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turn input and output types.

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::TurnWarning;
use crate::types::{ContentPart, ImageMediaType, Message, Role, TokenUsage};

/// Session identifier (a chat id, a user id, or any opaque key).
pub type SessionId = String;

/// An image attached to a turn, already base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime: ImageMediaType,
    pub data: String,
}

impl ImageAttachment {
    pub fn new(mime: ImageMediaType, data: impl Into<String>) -> Self {
        Self {
            mime,
            data: data.into(),
        }
    }

    /// Encode raw image bytes.
    pub fn from_bytes(mime: ImageMediaType, bytes: &[u8]) -> Self {
        use base64::Engine;
        Self::new(mime, base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Text sent in place of a missing caption.
    pub fn placeholder(&self) -> &'static str {
        match self.mime {
            ImageMediaType::Webp => "I sent a sticker",
            _ => "I sent a photo",
        }
    }
}

/// The message a turn replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedReply {
    pub author: String,
    pub text: String,
}

/// One incoming user turn, as handed over by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingTurn {
    pub text: Option<String>,
    pub author: Option<String>,
    pub quoted: Option<QuotedReply>,
    pub image: Option<ImageAttachment>,
}

impl IncomingTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_quote(mut self, author: impl Into<String>, text: impl Into<String>) -> Self {
        self.quoted = Some(QuotedReply {
            author: author.into(),
            text: text.into(),
        });
        self
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Build the user message for this turn.
    ///
    /// The quote line is added only when quoting is enabled, the transcript
    /// has history, and the quoted text is not already its last message. Without vision
    /// the image is dropped, but its placeholder text still stands in for a
    /// missing caption.
    pub fn to_message(&self, transcript: &[Message], config: &SessionConfig) -> Message {
        let mut prompt = String::new();

        if let Some(quoted) = self.quoted.as_ref().filter(|_| config.reply_to_quotes) {
            let repeated = transcript
                .last()
                .map(|last| last.text() == quoted.text)
                .unwrap_or(false);
            if !transcript.is_empty() && !repeated {
                prompt.push_str(&format!(
                    "Previous message ({}): \"{}\"\n",
                    quoted.author, quoted.text
                ));
            }
        }

        let body = self
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.image.as_ref().map(ImageAttachment::placeholder))
            .unwrap_or_default();

        match &self.author {
            Some(author) => prompt.push_str(&format!("Message ({}): {}", author, body)),
            None => prompt.push_str(body),
        }

        match self.image.as_ref().filter(|_| config.vision) {
            Some(image) => Message::with_parts(
                Role::User,
                vec![
                    ContentPart::image(image.mime, image.data.clone()),
                    ContentPart::text(prompt),
                ],
            ),
            None => Message::user(prompt),
        }
    }
}

/// What a successful turn produced.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Answer chunks in delivery order.
    pub chunks: Vec<String>,
    pub usage: TokenUsage,
    /// Non-fatal problems (persistence, compaction) raised by the turn.
    pub warnings: Vec<TurnWarning>,
}

impl TurnOutcome {
    /// The answer as one string, chunks joined by newlines.
    pub fn answer(&self) -> String {
        self.chunks.join("\n")
    }
}

/// Append the token usage footer to an answer.
pub fn with_usage_footer(answer: &str, usage: &TokenUsage) -> String {
    if answer.is_empty() && usage.total_tokens == 0 && usage.input_tokens == 0 {
        return format!(
            "{}\n\n---\n⚠️ Token counter and summarizer do not work with this API.",
            answer
        );
    }

    let breakdown = match (usage.input_tokens, usage.output_tokens) {
        (0, 0) => String::new(),
        (input, 0) => format!(" ({} prompt)", input),
        (0, output) => format!(" ({} answer)", output),
        (input, output) => format!(" ({} prompt, {} answer)", input, output),
    };
    let total = match usage.total_tokens {
        0 => usage.input_tokens + usage.output_tokens,
        total => total,
    };

    format!("{}\n\n---\n💰 {} chat tokens used{}", answer, total, breakdown)
}
