// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming response handling.
//!
//! [`SseDecoder`] turns raw server-sent-event bytes into `(event, data)`
//! frames as they arrive. Vendor adapters map frames to [`StreamEvent`]s and
//! feed them to a [`StreamAggregator`], which accumulates the answer text and
//! token counters in a single pass and decides the outcome once the stream
//! ends.

use crate::error::VendorError;
use crate::types::{TokenUsage, VendorReply};

/// Message used when the stream reported an error without any detail.
const GENERIC_STREAM_ERROR: &str = "The vendor reported an error during streaming";

/// A normalized, vendor-independent streaming event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Start of the answer; `None` when the vendor omitted usage info.
    MessageStart { input_tokens: Option<u32> },
    /// A fragment of answer text.
    ContentDelta(String),
    /// Output token count delta.
    MessageDelta { output_tokens: u32 },
    /// An explicit error event.
    Error(String),
    /// Any other event (pings, block boundaries, stop markers).
    Other,
}

/// Accumulates streaming events into a final reply.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    events_seen: usize,
    input_tokens: u32,
    output_tokens: u32,
    text: String,
    failed: bool,
    error_message: Option<String>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one event. Errors are recorded, never raised here.
    pub fn feed(&mut self, event: StreamEvent) {
        self.events_seen += 1;
        match event {
            StreamEvent::MessageStart { input_tokens } => match input_tokens {
                Some(tokens) => self.input_tokens += tokens,
                None => self.failed = true,
            },
            StreamEvent::ContentDelta(fragment) => self.text.push_str(&fragment),
            StreamEvent::MessageDelta { output_tokens } => self.output_tokens += output_tokens,
            StreamEvent::Error(message) => {
                self.failed = true;
                if !message.trim().is_empty() {
                    self.error_message = Some(message);
                }
            }
            StreamEvent::Other => {}
        }
    }

    pub fn events_seen(&self) -> usize {
        self.events_seen
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Decide the outcome of the stream.
    pub fn finish(self) -> Result<VendorReply, VendorError> {
        if self.events_seen == 0 {
            return Err(VendorError::EmptyStream);
        }
        if self.failed {
            let message = match self.error_message {
                Some(message) => message,
                None if !self.text.trim().is_empty() => self.text,
                None => GENERIC_STREAM_ERROR.to_string(),
            };
            return Err(VendorError::StreamError(message));
        }
        if self.text.trim().is_empty() {
            return Err(VendorError::EmptyResult);
        }

        let usage = TokenUsage::new(self.input_tokens, self.output_tokens, None);
        Ok(VendorReply::new(self.text, usage))
    }
}

/// Run a whole event sequence through a fresh aggregator.
pub fn aggregate<I>(events: I) -> Result<VendorReply, VendorError>
where
    I: IntoIterator<Item = StreamEvent>,
{
    let mut aggregator = StreamAggregator::new();
    for event in events {
        aggregator.feed(event);
    }
    aggregator.finish()
}

// ============================================================================
// SSE Decoding
// ============================================================================

/// One server-sent event: its `event:` name (possibly empty) and `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Parse an SSE field line into `(field, value)`.
pub fn parse_sse_line(line: &str) -> Option<(&str, &str)> {
    if let Some(value) = line.strip_prefix("event:") {
        Some(("event", value.trim()))
    } else if let Some(value) = line.strip_prefix("data:") {
        Some(("data", value.trim()))
    } else {
        None
    }
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence; only
/// complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body, returning every frame it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end_matches(['\r', '\n']), &mut frames);
        }

        frames
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.handle_line(line.trim_end_matches('\r'), &mut frames);
        }
        frames
    }

    fn handle_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.event.clear();
            return;
        }
        match parse_sse_line(line) {
            Some(("event", value)) => self.event = value.to_string(),
            Some(("data", value)) => frames.push(SseFrame {
                event: self.event.clone(),
                data: value.to_string(),
            }),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregates_text_and_usage() {
        let reply = aggregate(vec![
            StreamEvent::MessageStart { input_tokens: Some(10) },
            StreamEvent::ContentDelta("ab".into()),
            StreamEvent::ContentDelta("c".into()),
            StreamEvent::MessageDelta { output_tokens: 5 },
        ])
        .unwrap();

        assert_eq!(reply.text, "abc");
        assert_eq!(reply.usage, TokenUsage::new(10, 5, None));
        assert_eq!(reply.usage.total(), 15);
    }

    #[test]
    fn test_zero_events_is_empty_stream() {
        assert_eq!(aggregate(Vec::new()), Err(VendorError::EmptyStream));
    }

    #[test]
    fn test_error_event_wins_over_empty_result() {
        let result = aggregate(vec![
            StreamEvent::MessageStart { input_tokens: Some(3) },
            StreamEvent::Error("Overloaded".into()),
        ]);
        assert_eq!(result, Err(VendorError::StreamError("Overloaded".into())));
    }

    #[test]
    fn test_missing_usage_fails_with_text() {
        let result = aggregate(vec![
            StreamEvent::MessageStart { input_tokens: None },
            StreamEvent::ContentDelta("proxy said no".into()),
        ]);
        assert_eq!(result, Err(VendorError::StreamError("proxy said no".into())));
    }

    #[test]
    fn test_error_without_detail_uses_generic_message() {
        let result = aggregate(vec![StreamEvent::Error(String::new())]);
        assert_eq!(
            result,
            Err(VendorError::StreamError(GENERIC_STREAM_ERROR.to_string()))
        );
    }

    #[test]
    fn test_whitespace_text_is_empty_result() {
        let result = aggregate(vec![
            StreamEvent::MessageStart { input_tokens: Some(1) },
            StreamEvent::ContentDelta(" \n ".into()),
            StreamEvent::Other,
        ]);
        assert_eq!(result, Err(VendorError::EmptyResult));
    }

    #[test]
    fn test_other_events_count_as_seen() {
        let mut aggregator = StreamAggregator::new();
        aggregator.feed(StreamEvent::Other);
        assert_eq!(aggregator.events_seen(), 1);
        assert_eq!(aggregator.finish(), Err(VendorError::EmptyResult));
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("event: ping"), Some(("event", "ping")));
        assert_eq!(parse_sse_line("data:{\"a\":1}"), Some(("data", "{\"a\":1}")));
        assert_eq!(parse_sse_line(": comment"), None);
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let body = "event: content_block_delta\ndata: {\"x\":\"é\"}\n\nevent: message_stop\ndata: {}\n\n";
        let bytes = body.as_bytes();
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        // Split inside the two-byte "é".
        let cut = body.find('é').unwrap() + 1;
        frames.extend(decoder.feed(&bytes[..cut]));
        frames.extend(decoder.feed(&bytes[cut..]));
        frames.extend(decoder.finish());

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "content_block_delta");
        assert_eq!(frames[0].data, "{\"x\":\"é\"}");
        assert_eq!(frames[1].event, "message_stop");
    }

    #[test]
    fn test_decoder_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        let frames = decoder.finish();
        assert_eq!(frames[0].data, "[DONE]");
        assert_eq!(frames[0].event, "");
    }
}
