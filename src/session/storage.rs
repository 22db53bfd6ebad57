// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session persistence.
//!
//! Each session stores its config and transcript as JSON documents keyed by
//! session id, plus up to [`TEMPLATE_LIMIT`] named prompt templates.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::error;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::config::SessionConfig;
use crate::error::StorageError;
use crate::types::{Message, Transcript};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Templates allowed per session.
pub const TEMPLATE_LIMIT: usize = 10;

/// Key-value persistence for sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load a session, registering `defaults` as its config when unknown.
    async fn load(
        &self,
        session_id: &str,
        defaults: &SessionConfig,
    ) -> Result<(SessionConfig, Option<Transcript>), StorageError>;

    async fn save_transcript(
        &self,
        session_id: &str,
        transcript: &[Message],
    ) -> Result<(), StorageError>;

    async fn save_config(&self, session_id: &str, config: &SessionConfig)
        -> Result<(), StorageError>;

    /// Forget the transcript, keeping the config.
    async fn reset_transcript(&self, session_id: &str) -> Result<(), StorageError>;

    /// Template names, sorted.
    async fn list_templates(&self, session_id: &str) -> Result<Vec<String>, StorageError>;

    /// Add or overwrite a template.
    async fn add_template(
        &self,
        session_id: &str,
        name: &str,
        text: &str,
    ) -> Result<(), StorageError>;

    async fn get_template(&self, session_id: &str, name: &str)
        -> Result<Option<String>, StorageError>;

    /// Returns whether a template was removed.
    async fn delete_template(&self, session_id: &str, name: &str) -> Result<bool, StorageError>;
}

/// Decode a stored config, falling back to `defaults` when it is unusable.
fn decode_config(session_id: &str, json: &str, defaults: &SessionConfig) -> SessionConfig {
    let parsed = serde_json::from_str::<SessionConfig>(json)
        .map_err(|e| e.to_string())
        .and_then(|c| c.validate().map(|_| c).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => config,
        Err(e) => {
            error!(session = session_id, "Stored config is invalid, using defaults: {}", e);
            defaults.clone()
        }
    }
}

fn decode_transcript(session_id: &str, json: &str) -> Option<Transcript> {
    match serde_json::from_str(json) {
        Ok(transcript) => Some(transcript),
        Err(e) => {
            error!(session = session_id, "Stored transcript is unreadable, starting fresh: {}", e);
            None
        }
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Session storage using SQLite.
///
/// The connection sits behind a mutex; every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<StdMutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a session database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation(op, start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = op;

        result
    }
}

fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            config TEXT NOT NULL,
            transcript TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS templates (
            session_id TEXT NOT NULL,
            name TEXT NOT NULL,
            text TEXT NOT NULL,
            PRIMARY KEY (session_id, name)
        );
        "#,
    )?;

    let current: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    if current.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            params![SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn load(
        &self,
        session_id: &str,
        defaults: &SessionConfig,
    ) -> Result<(SessionConfig, Option<Transcript>), StorageError> {
        let id = session_id.to_string();
        let defaults = defaults.clone();

        self.with_conn("session.storage.load", move |conn| {
            let row: Option<(String, Option<String>)> = conn
                .query_row(
                    "SELECT config, transcript FROM sessions WHERE id = ?",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((config, transcript)) => Ok((
                    decode_config(&id, &config, &defaults),
                    transcript.and_then(|t| decode_transcript(&id, &t)),
                )),
                None => {
                    let ts = now();
                    conn.execute(
                        "INSERT INTO sessions (id, config, transcript, created_at, updated_at)
                         VALUES (?, ?, NULL, ?, ?)",
                        params![id, serde_json::to_string(&defaults)?, ts, ts],
                    )?;
                    Ok((defaults, None))
                }
            }
        })
        .await
    }

    async fn save_transcript(
        &self,
        session_id: &str,
        transcript: &[Message],
    ) -> Result<(), StorageError> {
        let id = session_id.to_string();
        let json = serde_json::to_string(transcript)?;

        self.with_conn("session.storage.save_transcript", move |conn| {
            let updated = conn.execute(
                "UPDATE sessions SET transcript = ?, updated_at = ? WHERE id = ?",
                params![json, now(), id],
            )?;
            if updated == 0 {
                let ts = now();
                conn.execute(
                    "INSERT INTO sessions (id, config, transcript, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        id,
                        serde_json::to_string(&SessionConfig::default())?,
                        json,
                        ts,
                        ts
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn save_config(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> Result<(), StorageError> {
        let id = session_id.to_string();
        let json = serde_json::to_string(config)?;

        self.with_conn("session.storage.save_config", move |conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO sessions (id, config, transcript, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, ?3)
                 ON CONFLICT(id) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at",
                params![id, json, ts],
            )?;
            Ok(())
        })
        .await
    }

    async fn reset_transcript(&self, session_id: &str) -> Result<(), StorageError> {
        let id = session_id.to_string();
        self.with_conn("session.storage.reset", move |conn| {
            conn.execute(
                "UPDATE sessions SET transcript = NULL, updated_at = ? WHERE id = ?",
                params![now(), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_templates(&self, session_id: &str) -> Result<Vec<String>, StorageError> {
        let id = session_id.to_string();
        self.with_conn("session.storage.list_templates", move |conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM templates WHERE session_id = ? ORDER BY name")?;
            let names = stmt
                .query_map(params![id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn add_template(
        &self,
        session_id: &str,
        name: &str,
        text: &str,
    ) -> Result<(), StorageError> {
        let id = session_id.to_string();
        let name = name.to_string();
        let text = text.to_string();

        self.with_conn("session.storage.add_template", move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM templates WHERE session_id = ? AND name = ?)",
                params![id, name],
                |row| row.get(0),
            )?;
            if !exists {
                let count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM templates WHERE session_id = ?",
                    params![id],
                    |row| row.get(0),
                )?;
                if count as usize >= TEMPLATE_LIMIT {
                    return Err(StorageError::TemplateLimit {
                        limit: TEMPLATE_LIMIT,
                    });
                }
            }
            tx.execute(
                "INSERT OR REPLACE INTO templates (session_id, name, text) VALUES (?, ?, ?)",
                params![id, name, text],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_template(
        &self,
        session_id: &str,
        name: &str,
    ) -> Result<Option<String>, StorageError> {
        let id = session_id.to_string();
        let name = name.to_string();
        self.with_conn("session.storage.get_template", move |conn| {
            let text = conn
                .query_row(
                    "SELECT text FROM templates WHERE session_id = ? AND name = ?",
                    params![id, name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(text)
        })
        .await
    }

    async fn delete_template(&self, session_id: &str, name: &str) -> Result<bool, StorageError> {
        let id = session_id.to_string();
        let name = name.to_string();
        self.with_conn("session.storage.delete_template", move |conn| {
            let deleted = conn.execute(
                "DELETE FROM templates WHERE session_id = ? AND name = ?",
                params![id, name],
            )?;
            Ok(deleted > 0)
        })
        .await
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
struct MemoryEntry {
    config: Option<SessionConfig>,
    transcript: Option<Transcript>,
    templates: BTreeMap<String, String>,
}

/// Storage that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored transcript of a session, if any.
    pub async fn transcript(&self, session_id: &str) -> Option<Transcript> {
        self.entries
            .lock()
            .await
            .get(session_id)
            .and_then(|e| e.transcript.clone())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(
        &self,
        session_id: &str,
        defaults: &SessionConfig,
    ) -> Result<(SessionConfig, Option<Transcript>), StorageError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(session_id.to_string()).or_default();
        let config = entry.config.get_or_insert_with(|| defaults.clone()).clone();
        Ok((config, entry.transcript.clone()))
    }

    async fn save_transcript(
        &self,
        session_id: &str,
        transcript: &[Message],
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        entries.entry(session_id.to_string()).or_default().transcript = Some(transcript.to_vec());
        Ok(())
    }

    async fn save_config(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        entries.entry(session_id.to_string()).or_default().config = Some(config.clone());
        Ok(())
    }

    async fn reset_transcript(&self, session_id: &str) -> Result<(), StorageError> {
        if let Some(entry) = self.entries.lock().await.get_mut(session_id) {
            entry.transcript = None;
        }
        Ok(())
    }

    async fn list_templates(&self, session_id: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .lock()
            .await
            .get(session_id)
            .map(|e| e.templates.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_template(
        &self,
        session_id: &str,
        name: &str,
        text: &str,
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let templates = &mut entries.entry(session_id.to_string()).or_default().templates;
        if !templates.contains_key(name) && templates.len() >= TEMPLATE_LIMIT {
            return Err(StorageError::TemplateLimit {
                limit: TEMPLATE_LIMIT,
            });
        }
        templates.insert(name.to_string(), text.to_string());
        Ok(())
    }

    async fn get_template(
        &self,
        session_id: &str,
        name: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .lock()
            .await
            .get(session_id)
            .and_then(|e| e.templates.get(name).cloned()))
    }

    async fn delete_template(&self, session_id: &str, name: &str) -> Result<bool, StorageError> {
        Ok(self
            .entries
            .lock()
            .await
            .get_mut(session_id)
            .map(|e| e.templates.remove(name).is_some())
            .unwrap_or(false))
    }
}
