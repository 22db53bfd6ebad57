// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The session: transcript, config and turn orchestration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::chunker::chunk;
use crate::config::{AppConfig, SessionConfig};
use crate::error::{
    CompactionError, ConfigError, PersistenceError, StorageError, TurnError, TurnWarning,
    VendorError,
};
use crate::providers::create_vendor;
use crate::types::{scrub_images, Message, SharedVendor, TokenUsage, Transcript, Vendor};

use super::compaction::{self, apply_summary};
use super::dispatch;
use super::storage::Storage;
use super::types::{with_usage_footer, IncomingTurn, SessionId, TurnOutcome};

/// Messages that keep their images when vision is on.
pub const IMAGE_HISTORY: usize = 10;

/// Builds the vendor adapter for a session config.
pub type VendorFactory =
    Arc<dyn Fn(&SessionConfig, &AppConfig) -> Result<SharedVendor, VendorError> + Send + Sync>;

/// The factory backed by the real HTTP adapters.
pub fn default_factory() -> VendorFactory {
    Arc::new(create_vendor)
}

#[derive(Clone)]
struct Limiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl Limiter {
    fn new(limit: u32) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }
}

struct SessionState {
    config: SessionConfig,
    transcript: Transcript,
    /// Built lazily, dropped whenever the config changes.
    vendor: Option<SharedVendor>,
    /// Bumped on every reset.
    generation: u64,
}

/// The result of the compute phase of a turn.
struct Answer {
    text: String,
    usage: TokenUsage,
    config: SessionConfig,
    warnings: Vec<TurnWarning>,
}

/// One conversation.
///
/// Up to `threads_limit` turns run at once. The transcript is only touched
/// under the state lock and only after a vendor call succeeded, so concurrent
/// turns append in completion order and never lose history.
pub struct Session {
    id: SessionId,
    app: Arc<AppConfig>,
    storage: Arc<dyn Storage>,
    factory: VendorFactory,
    state: Mutex<SessionState>,
    limiter: StdMutex<Limiter>,
    /// Set when a compaction starts, cleared once the session is idle.
    compaction_pending: AtomicBool,
    delivery: Mutex<()>,
}

impl Session {
    pub fn new(
        id: impl Into<SessionId>,
        config: SessionConfig,
        transcript: Option<Transcript>,
        storage: Arc<dyn Storage>,
        app: Arc<AppConfig>,
        factory: VendorFactory,
    ) -> Self {
        let mut transcript = transcript.unwrap_or_default();
        if !config.vision {
            scrub_images(&mut transcript, 0);
        }

        Self {
            id: id.into(),
            app,
            storage,
            factory,
            limiter: StdMutex::new(Limiter::new(config.threads_limit)),
            state: Mutex::new(SessionState {
                config,
                transcript,
                vendor: None,
                generation: 0,
            }),
            compaction_pending: AtomicBool::new(false),
            delivery: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn config(&self) -> SessionConfig {
        self.state.lock().await.config.clone()
    }

    pub async fn transcript(&self) -> Transcript {
        self.state.lock().await.transcript.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    fn limiter(&self) -> Limiter {
        self.limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turns currently holding a slot.
    pub fn in_flight(&self) -> usize {
        let limiter = self.limiter();
        limiter
            .limit
            .saturating_sub(limiter.semaphore.available_permits())
    }

    pub fn compaction_pending(&self) -> bool {
        self.compaction_pending.load(Ordering::SeqCst)
    }

    /// Serializes delivery of whole answers.
    pub fn delivery_lock(&self) -> &Mutex<()> {
        &self.delivery
    }

    /// Run one turn: dispatch, append, compact, persist, chunk.
    ///
    /// Waits while `threads_limit` turns are already in flight. A failed
    /// vendor call leaves the transcript untouched.
    pub async fn submit_turn(&self, turn: IncomingTurn) -> Result<TurnOutcome, TurnError> {
        let limiter = self.limiter();
        let permit = Arc::clone(&limiter.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| TurnError::Closed(self.id.clone()))?;

        let result = self.run_turn(turn).await;

        drop(permit);
        if limiter.semaphore.available_permits() >= limiter.limit
            && self.compaction_pending.swap(false, Ordering::SeqCst)
        {
            debug!(session = %self.id, "Session idle, compaction re-armed");
        }

        let answer = result?;
        let text = if answer.config.show_used_tokens {
            with_usage_footer(&answer.text, &answer.usage)
        } else {
            answer.text
        };

        Ok(TurnOutcome {
            chunks: chunk(
                &text,
                answer.config.max_answer_len as usize,
                answer.config.split_paragraphs,
            ),
            usage: answer.usage,
            warnings: answer.warnings,
        })
    }

    async fn run_turn(&self, turn: IncomingTurn) -> Result<Answer, TurnError> {
        let (config, vendor, user_message, request) = {
            let mut state = self.state.lock().await;

            let missing = state.config.missing_params();
            if !missing.is_empty() {
                return Err(TurnError::NotConfigured { missing });
            }

            let vendor = match &state.vendor {
                Some(vendor) => Arc::clone(vendor),
                None => {
                    let vendor = (self.factory)(&state.config, &self.app)
                        .map_err(|source| TurnError::Failed {
                            attempts: 0,
                            source,
                        })?;
                    state.vendor = Some(Arc::clone(&vendor));
                    vendor
                }
            };

            let user_message = turn.to_message(&state.transcript, &state.config);
            let mut request = state.transcript.clone();
            request.push(user_message.clone());
            (state.config.clone(), vendor, user_message, request)
        };

        let reply = dispatch::send(vendor.as_ref(), &request, config.attempts)
            .await
            .map_err(|e| {
                error!(session = %self.id, attempts = e.attempts, "Turn failed: {}", e.error);
                if self.app.full_debug {
                    error!(session = %self.id, "Request was: {:?}", request);
                }
                TurnError::Failed {
                    attempts: e.attempts,
                    source: e.error,
                }
            })?;

        info!(
            session = %self.id,
            tokens = reply.usage.total(),
            "{} tokens counted by {}",
            reply.usage.total(),
            vendor.name()
        );
        if self.app.full_debug {
            info!(session = %self.id, "Request: {:?}\nAnswer: {}", request, reply.text);
        }

        let compaction = {
            let mut state = self.state.lock().await;
            state.transcript.push(user_message);
            state.transcript.push(Message::assistant(reply.text.clone()));

            if config.vision && state.transcript.len() > IMAGE_HISTORY {
                scrub_images(&mut state.transcript, IMAGE_HISTORY);
            }

            let over_limit = reply.usage.total() >= config.summarizer_limit;
            if over_limit && !self.compaction_pending.swap(true, Ordering::SeqCst) {
                Some((state.transcript.clone(), state.generation))
            } else {
                None
            }
        };

        let mut warnings = Vec::new();

        if let Some((snapshot, generation)) = compaction {
            info!(
                session = %self.id,
                limit = config.summarizer_limit,
                "Token limit exceeded, compacting the transcript"
            );
            if let Err(e) = self
                .compact(vendor.as_ref(), &config, &snapshot, generation)
                .await
            {
                error!(session = %self.id, "Compaction failed: {}", e);
                warnings.push(TurnWarning::from(e));
            }
        }

        {
            let state = self.state.lock().await;
            if let Err(source) = self.storage.save_transcript(&self.id, &state.transcript).await {
                error!(session = %self.id, "Unable to save the transcript: {}", source);
                warnings.push(TurnWarning::from(PersistenceError {
                    session_id: self.id.clone(),
                    source,
                }));
            }
        }

        Ok(Answer {
            text: reply.text,
            usage: reply.usage,
            config,
            warnings,
        })
    }

    async fn compact(
        &self,
        vendor: &dyn Vendor,
        config: &SessionConfig,
        snapshot: &[Message],
        generation: u64,
    ) -> Result<(), CompactionError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let summary = compaction::summarize(
            vendor,
            snapshot,
            &config.summariser_prompt,
            config.attempts,
        )
        .await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("session.compaction", start.elapsed());

        let Some(summary) = summary? else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.generation != generation || state.transcript.len() < snapshot.len() {
            debug!(session = %self.id, "Transcript changed during compaction, summary dropped");
            return Ok(());
        }

        state.transcript = apply_summary(
            &state.transcript,
            summary.boundary,
            &config.summariser_prompt,
            summary.text,
        );
        info!(
            session = %self.id,
            messages = state.transcript.len(),
            "Compaction completed"
        );
        Ok(())
    }

    /// Clear the transcript in memory and in storage.
    pub async fn reset(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.transcript.clear();
        state.generation += 1;
        self.storage.reset_transcript(&self.id).await
    }

    /// Edit the config, validate it and persist it.
    ///
    /// The vendor adapter is rebuilt once for the new config. Turning vision
    /// off scrubs every image from the transcript.
    pub async fn update_config<F>(&self, edit: F) -> crate::error::Result<SessionConfig>
    where
        F: FnOnce(&mut SessionConfig) -> Result<(), ConfigError>,
    {
        let mut state = self.state.lock().await;

        let mut config = state.config.clone();
        edit(&mut config)?;
        config.validate()?;
        if config == state.config {
            return Ok(config);
        }

        self.storage.save_config(&self.id, &config).await?;

        if state.config.vision && !config.vision {
            scrub_images(&mut state.transcript, 0);
            self.storage
                .save_transcript(&self.id, &state.transcript)
                .await?;
        }

        if config.threads_limit != state.config.threads_limit {
            *self.limiter.lock().unwrap_or_else(PoisonError::into_inner) =
                Limiter::new(config.threads_limit);
        }

        state.vendor = if config.missing_params().is_empty() {
            match (self.factory)(&config, &self.app) {
                Ok(vendor) => Some(vendor),
                Err(e) => {
                    warn!(session = %self.id, "Vendor not ready: {}", e);
                    None
                }
            }
        } else {
            None
        };
        state.config = config.clone();

        Ok(config)
    }

    /// Refuse new turns. Turns waiting for a slot fail with [`TurnError::Closed`].
    pub fn close(&self) {
        self.limiter().semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::session::storage::{MemoryStorage, MockStorage};
    use crate::types::{ContentPart, ImageMediaType, Role, VendorReply};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Vendor for Echo {
        async fn dispatch(&self, messages: &[Message]) -> Result<VendorReply, VendorError> {
            let last = messages.last().map(|m| m.text()).unwrap_or_default();
            Ok(VendorReply::new(
                format!("echo: {}", last),
                TokenUsage::new(3, 2, None),
            ))
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }
    }

    fn configured() -> SessionConfig {
        SessionConfig {
            api_key: Some("key".to_string()),
            model: Some("echo-1".to_string()),
            show_used_tokens: false,
            ..Default::default()
        }
    }

    fn echo_factory() -> VendorFactory {
        Arc::new(|_: &SessionConfig, _: &AppConfig| -> Result<SharedVendor, VendorError> {
            Ok(Arc::new(Echo))
        })
    }

    fn session(config: SessionConfig, storage: Arc<dyn Storage>) -> Session {
        Session::new(
            "s1",
            config,
            None,
            storage,
            Arc::new(AppConfig::default()),
            echo_factory(),
        )
    }

    #[tokio::test]
    async fn test_turn_appends_two_messages() {
        let session = session(configured(), Arc::new(MemoryStorage::new()));
        let outcome = session.submit_turn(IncomingTurn::text("hi")).await.unwrap();

        assert_eq!(outcome.chunks, vec!["echo: hi".to_string()]);
        assert_eq!(outcome.usage.total(), 5);
        assert!(outcome.warnings.is_empty());
        assert_eq!(
            session.transcript().await,
            vec![Message::user("hi"), Message::assistant("echo: hi")]
        );
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_session_fails() {
        let session = session(SessionConfig::default(), Arc::new(MemoryStorage::new()));
        let err = session
            .submit_turn(IncomingTurn::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::NotConfigured { ref missing } if missing.len() == 2));
        assert!(session.transcript().await.is_empty());
    }

    #[tokio::test]
    async fn test_usage_footer_is_not_stored() {
        let mut config = configured();
        config.show_used_tokens = true;
        let session = session(config, Arc::new(MemoryStorage::new()));

        let outcome = session.submit_turn(IncomingTurn::text("hi")).await.unwrap();
        assert!(outcome.answer().ends_with("💰 5 chat tokens used (3 prompt, 2 answer)"));
        assert_eq!(session.transcript().await[1], Message::assistant("echo: hi"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_a_warning() {
        let mut storage = MockStorage::new();
        storage
            .expect_save_transcript()
            .returning(|_, _| Err(StorageError::Database("disk full".into())));

        let session = session(configured(), Arc::new(storage));
        let outcome = session.submit_turn(IncomingTurn::text("hi")).await.unwrap();

        assert_eq!(outcome.chunks, vec!["echo: hi".to_string()]);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(outcome.warnings[0], TurnWarning::Persistence(_)));
        assert_eq!(session.transcript().await.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_and_bumps_generation() {
        let storage = Arc::new(MemoryStorage::new());
        let session = session(configured(), storage.clone());
        session.submit_turn(IncomingTurn::text("hi")).await.unwrap();
        assert!(storage.transcript("s1").await.is_some());

        session.reset().await.unwrap();
        assert!(session.transcript().await.is_empty());
        assert_eq!(session.generation().await, 1);
        assert!(storage.transcript("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let session = session(configured(), Arc::new(MemoryStorage::new()));

        let err = session
            .update_config(|c| c.set_param("attempts", "42"))
            .await;
        assert!(err.is_err());
        assert_eq!(session.config().await.attempts, 7);

        let config = session
            .update_config(|c| c.set_param("threads-limit", "2"))
            .await
            .unwrap();
        assert_eq!(config.threads_limit, 2);
        assert_eq!(session.config().await.threads_limit, 2);
    }

    #[tokio::test]
    async fn test_disabling_vision_scrubs_images() {
        let mut config = configured();
        config.vision = true;
        let photo = Message::with_parts(
            Role::User,
            vec![
                ContentPart::image(ImageMediaType::Png, "iVBORw0KGgo="),
                ContentPart::text("look"),
            ],
        );
        let session = Session::new(
            "s1",
            config,
            Some(vec![photo, Message::assistant("nice")]),
            Arc::new(MemoryStorage::new()),
            Arc::new(AppConfig::default()),
            echo_factory(),
        );
        assert!(session.transcript().await[0].has_images());

        session
            .update_config(|c| c.set_param("vision", "false"))
            .await
            .unwrap();
        let transcript = session.transcript().await;
        assert!(!transcript[0].has_images());
        assert_eq!(transcript[0].as_text(), Some("look"));
    }

    #[tokio::test]
    async fn test_closed_session_refuses_turns() {
        let session = session(configured(), Arc::new(MemoryStorage::new()));
        session.close();
        let err = session
            .submit_turn(IncomingTurn::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Closed(_)));
    }
}
