// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ordered delivery of answer chunks to a transport.
//!
//! Chunks of one answer go out in order, one at a time, never interleaved
//! with another answer of the same session. A pause separates consecutive
//! chunks to stay under the transport's rate limits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{AppConfig, SessionConfig};
use crate::error::{TransportError, TurnError};
use crate::session::{Session, TurnOutcome};

/// Handle of an editable placeholder message.
pub type PlaceholderId = String;

/// Text shown while an inline answer is being generated.
pub const INLINE_PENDING: &str = "⏳ Generating an answer...";

/// The messaging side of the system.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message. `formatted` asks the transport to render markdown.
    async fn send_chunk(
        &self,
        session_id: &str,
        text: &str,
        formatted: bool,
    ) -> Result<(), TransportError>;

    /// Send a message that will be edited later.
    async fn send_placeholder(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<PlaceholderId, TransportError>;

    async fn edit_placeholder(&self, id: &PlaceholderId, text: &str)
        -> Result<(), TransportError>;
}

/// Drop markdown markers the transport would otherwise show verbatim.
pub fn strip_markdown(text: &str) -> String {
    text.replace(['*', '`'], "")
}

fn prepare(text: &str, config: &SessionConfig) -> String {
    if config.markdown_filter && !config.markdown_enable {
        strip_markdown(text)
    } else {
        text.to_string()
    }
}

/// What happened to one answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub skipped: usize,
    /// Chunks re-sent without formatting after a rejection.
    pub plain_retries: usize,
}

/// Delivers answers through a [`Transport`].
pub struct Deliverer {
    transport: Arc<dyn Transport>,
    pacing: Duration,
}

impl Deliverer {
    pub fn new(transport: Arc<dyn Transport>, pacing: Duration) -> Self {
        Self { transport, pacing }
    }

    /// Pacing taken from `chunk_delay_ms`.
    pub fn from_app(transport: Arc<dyn Transport>, app: &AppConfig) -> Self {
        Self::new(transport, Duration::from_millis(app.chunk_delay_ms))
    }

    /// Deliver every chunk of one answer, holding the session's delivery lock.
    ///
    /// A chunk the transport cannot format is sent again as plain text, with
    /// markup removed when `markdown_filter` is on. Empty
    /// chunks are skipped. Any other transport error stops the delivery.
    pub async fn deliver(
        &self,
        session: &Session,
        chunks: &[String],
    ) -> Result<DeliveryReport, TransportError> {
        let config = session.config().await;
        let _guard = session.delivery_lock().lock().await;
        let mut report = DeliveryReport::default();

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let text = prepare(chunk, &config);
            if text.trim().is_empty() {
                warn!(session = session.id(), "Skipping empty chunk");
                report.skipped += 1;
                continue;
            }

            match self
                .transport
                .send_chunk(session.id(), &text, config.markdown_enable)
                .await
            {
                Ok(()) => report.sent += 1,
                Err(TransportError::FormattingRejected(reason)) => {
                    warn!(
                        session = session.id(),
                        "Transport could not parse formatting, sending as plain text: {}",
                        reason
                    );
                    let plain = if config.markdown_filter {
                        strip_markdown(&text)
                    } else {
                        text.clone()
                    };
                    self.transport.send_chunk(session.id(), &plain, false).await?;
                    report.sent += 1;
                    report.plain_retries += 1;
                }
                Err(TransportError::EmptyText) => {
                    warn!(session = session.id(), "Transport refused an empty message: {:?}", text);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(session = session.id(), ?report, "Answer delivered");
        Ok(report)
    }

    /// Deliver an inline answer: show a placeholder while `answer` runs, then
    /// replace it with the first chunk, or with the error.
    pub async fn deliver_inline<F>(
        &self,
        session: &Session,
        query: &str,
        answer: F,
    ) -> Result<PlaceholderId, TransportError>
    where
        F: Future<Output = Result<TurnOutcome, TurnError>> + Send,
    {
        let id = self
            .transport
            .send_placeholder(session.id(), &format!("{}\n\n{}", query, INLINE_PENDING))
            .await?;

        let body = match answer.await {
            Ok(outcome) => {
                let config = session.config().await;
                let first = outcome.chunks.first().map(String::as_str).unwrap_or_default();
                format!("{}\n\nAnswer: {}", query, prepare(first, &config))
            }
            Err(e) => format!("{}\n\nError: {}", query, e),
        };

        self.transport.edit_placeholder(&id, &body).await?;
        Ok(id)
    }
}
