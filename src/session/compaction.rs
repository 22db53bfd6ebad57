// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context compaction.
//!
//! When a turn reports a token total at or above the session's
//! `summarizer_limit`, the older part of the transcript is replaced by a short
//! summary written by the vendor itself:
//!
//! ```text
//! before:  m0 m1 m2 m3 m4 | m5(user) m6 m7
//!                         ^ boundary
//! after:   [prompt(user), summary(assistant)] m5 m6 m7
//! ```
//!
//! The boundary is the first user message whose cumulative text length
//! reaches a threshold. The threshold starts at 70% of the whole transcript's
//! length and decays by the same factor each round without a hit.

use tracing::{debug, info};

use crate::error::CompactionError;
use crate::types::{Message, Role, Transcript, Vendor};

use super::dispatch;

/// Threshold decay per round, and the initial fraction of the total length.
pub const DECAY: f64 = 0.7;

/// Rounds before the search gives up and keeps only the last turn.
pub const MAX_ROUNDS: usize = 64;

/// Find where the kept suffix starts.
///
/// Returns `0` for an empty transcript, which means there is nothing to
/// compact. Lengths are counted in characters of text parts only.
pub fn find_compaction_boundary(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let cumulative: Vec<usize> = messages
        .iter()
        .scan(0usize, |total, m| {
            *total += m.text_len();
            Some(*total)
        })
        .collect();
    let total = cumulative.last().copied().unwrap_or(0) as f64;

    let mut threshold = total * DECAY;
    for round in 0..MAX_ROUNDS {
        let hit = messages
            .iter()
            .zip(&cumulative)
            .position(|(m, &len)| m.role == Role::User && len as f64 >= threshold);
        if let Some(index) = hit {
            debug!(index, round, threshold, "Compaction boundary found");
            return index;
        }
        threshold *= DECAY;
    }

    messages.len().saturating_sub(2)
}

/// The request asking the vendor to summarize `prefix`.
///
/// Images are stripped; vendors summarize them poorly.
pub fn build_summary_request(prefix: &[Message], prompt: &str) -> Vec<Message> {
    let mut request: Vec<Message> = prefix.to_vec();
    for message in &mut request {
        message.strip_images();
    }
    request.push(Message::user(prompt));
    request
}

/// Replace everything before `boundary` with the prompt and its summary.
pub fn apply_summary(
    transcript: &[Message],
    boundary: usize,
    prompt: &str,
    summary: impl Into<String>,
) -> Transcript {
    let boundary = boundary.min(transcript.len());
    let mut compacted = Vec::with_capacity(transcript.len() - boundary + 2);
    compacted.push(Message::user(prompt));
    compacted.push(Message::assistant(summary));
    compacted.extend_from_slice(&transcript[boundary..]);
    compacted
}

/// A summary ready to be spliced into the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub boundary: usize,
    pub text: String,
}

/// Ask the vendor to summarize the head of `transcript`.
///
/// `Ok(None)` means the boundary left no prefix to summarize.
pub async fn summarize(
    vendor: &dyn Vendor,
    transcript: &[Message],
    prompt: &str,
    attempts: u32,
) -> Result<Option<Summary>, CompactionError> {
    let boundary = find_compaction_boundary(transcript);
    if boundary == 0 {
        debug!("Nothing to compact before the first message");
        return Ok(None);
    }

    let request = build_summary_request(&transcript[..boundary], prompt);
    let reply = dispatch::send(vendor, &request, attempts)
        .await
        .map_err(|e| CompactionError {
            attempts: e.attempts,
            source: e.error,
        })?;

    info!(
        boundary,
        tokens = reply.usage.total(),
        "{} tokens were used to compact the transcript",
        reply.usage.total()
    );
    Ok(Some(Summary {
        boundary,
        text: reply.text,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentPart, ImageMediaType};

    fn turn(user: &str, assistant: &str) -> Vec<Message> {
        vec![Message::user(user), Message::assistant(assistant)]
    }

    #[test]
    fn test_boundary_on_first_pass() {
        // cumulative: 10 20 30 40 50 60 (total 60, threshold 42)
        let messages: Vec<Message> = (0..3)
            .flat_map(|_| turn("uuuuuuuuuu", "aaaaaaaaaa"))
            .collect();
        assert_eq!(find_compaction_boundary(&messages), 4);
    }

    #[test]
    fn test_boundary_after_decay() {
        // The only user message after the 70% mark is missing, so the
        // threshold decays until the long first question qualifies.
        let messages = vec![
            Message::user("x".repeat(30)),
            Message::assistant("y".repeat(100)),
        ];
        assert_eq!(find_compaction_boundary(&messages), 0);

        let messages = vec![
            Message::user("a".repeat(5)),
            Message::assistant("b".repeat(5)),
            Message::user("c".repeat(10)),
            Message::assistant("d".repeat(80)),
        ];
        // total 100: thresholds 70, 49, 34.3, 24.01, 16.8 -> index 2 (len 20)
        assert_eq!(find_compaction_boundary(&messages), 2);
    }

    #[test]
    fn test_boundary_always_user() {
        let mut messages = Vec::new();
        for i in 0..20 {
            messages.push(Message::user("q".repeat(i * 7 % 23 + 1)));
            messages.push(Message::assistant("a".repeat(i * 13 % 41)));
        }
        let index = find_compaction_boundary(&messages);
        assert_eq!(messages[index].role, Role::User);
        assert!(index > 0);
    }

    #[test]
    fn test_boundary_counts_text_parts_only() {
        let photo = Message::with_parts(
            Role::User,
            vec![
                ContentPart::image(ImageMediaType::Png, "A".repeat(10_000)),
                ContentPart::text("hi"),
            ],
        );
        let messages = vec![
            photo,
            Message::assistant("a".repeat(8)),
            Message::user("b".repeat(10)),
            Message::assistant("c"),
        ];
        // cumulative: 2 10 20 21 -> threshold 14.7 -> index 2
        assert_eq!(find_compaction_boundary(&messages), 2);
    }

    #[test]
    fn test_boundary_without_user_messages_terminates() {
        let messages = vec![
            Message::assistant("one"),
            Message::assistant("two"),
            Message::assistant("three"),
        ];
        assert_eq!(find_compaction_boundary(&messages), 1);
        assert_eq!(find_compaction_boundary(&[]), 0);
    }

    #[test]
    fn test_summary_request_strips_images() {
        let prefix = vec![Message::with_parts(
            Role::User,
            vec![
                ContentPart::image(ImageMediaType::Jpeg, "/9j/"),
                ContentPart::text("look"),
            ],
        )];
        let request = build_summary_request(&prefix, "Summarize.");
        assert_eq!(request.len(), 2);
        assert!(!request[0].has_images());
        assert_eq!(request[0].as_text(), Some("look"));
        assert_eq!(request[1], Message::user("Summarize."));
    }

    #[test]
    fn test_apply_summary() {
        let transcript: Vec<Message> = turn("q1", "a1")
            .into_iter()
            .chain(turn("q2", "a2"))
            .collect();
        let compacted = apply_summary(&transcript, 2, "Summarize.", "We talked.");
        assert_eq!(
            compacted,
            vec![
                Message::user("Summarize."),
                Message::assistant("We talked."),
                Message::user("q2"),
                Message::assistant("a2"),
            ]
        );
    }
}
