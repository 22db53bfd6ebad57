// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide store of live sessions.
//!
//! Created at startup, sessions are loaded lazily on first use and live until
//! evicted or until [`SessionRegistry::clear`] runs at shutdown. Nothing here
//! is persisted beyond what each session writes through [`Storage`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{AppConfig, SessionConfig};
use crate::error::{ConfigError, StorageError};

use super::engine::{default_factory, Session, VendorFactory};
use super::storage::Storage;
use super::types::SessionId;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    storage: Arc<dyn Storage>,
    app: Arc<AppConfig>,
    factory: VendorFactory,
}

impl SessionRegistry {
    /// Registry whose sessions talk to the real vendors.
    pub fn new(storage: Arc<dyn Storage>, app: Arc<AppConfig>) -> Self {
        Self::with_factory(storage, app, default_factory())
    }

    pub fn with_factory(
        storage: Arc<dyn Storage>,
        app: Arc<AppConfig>,
        factory: VendorFactory,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            storage,
            app,
            factory,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    /// Return the live session, loading it from storage the first time.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<Session>, StorageError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(id) {
            return Ok(Arc::clone(session));
        }

        let (config, transcript) = self.storage.load(id, &self.app.session_defaults).await?;
        debug!(
            session = id,
            messages = transcript.as_ref().map(Vec::len).unwrap_or(0),
            "Session loaded"
        );

        let session = Arc::new(Session::new(
            id,
            config,
            transcript,
            Arc::clone(&self.storage),
            Arc::clone(&self.app),
            Arc::clone(&self.factory),
        ));
        sessions.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// The live session, without loading.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Clear a session's transcript.
    pub async fn reset(&self, id: &str) -> Result<(), StorageError> {
        self.get_or_create(id).await?.reset().await?;
        info!(session = id, "Session reset");
        Ok(())
    }

    /// Apply a validated config edit to a session.
    pub async fn update_config<F>(&self, id: &str, edit: F) -> crate::error::Result<SessionConfig>
    where
        F: FnOnce(&mut SessionConfig) -> Result<(), ConfigError>,
    {
        let session = self.get_or_create(id).await?;
        session.update_config(edit).await
    }

    /// Drop a session from memory. Waiting turns are refused.
    pub async fn evict(&self, id: &str) -> bool {
        match self.sessions.lock().await.remove(id) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Shutdown: close and forget every session.
    pub async fn clear(&self) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values() {
            session.close();
        }
        sessions.clear();
    }
}
