// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Short-lived cache of inline answers.
//!
//! Entries are stamped on insertion and dropped by [`InlineCache::sweep`] once
//! older than the TTL. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct Entry<V> {
    inserted: Instant,
    value: V,
}

#[derive(Debug)]
pub struct InlineCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> InlineCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.into(),
                Entry {
                    inserted: Instant::now(),
                    value,
                },
            );
    }

    /// The cached value. Expired entries still answer until the next sweep.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|e| e.value.clone())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries older than the TTL, returning how many went.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.inserted) <= self.ttl);
        before - entries.len()
    }
}

impl<V: Clone + Send + Sync + 'static> InlineCache<V> {
    /// Sweep every `interval` on the tokio runtime until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, "Inline cache swept");
                }
            }
        })
    }
}

impl<V: Clone> Default for InlineCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let cache = InlineCache::default();
        assert_eq!(cache.ttl(), DEFAULT_TTL);
        cache.insert("q1", "answer".to_string());
        assert_eq!(cache.get("q1").as_deref(), Some("answer"));
        assert_eq!(cache.remove("q1").as_deref(), Some("answer"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_drops_expired() {
        let cache = InlineCache::new(Duration::from_secs(60));
        cache.insert("old", 1);
        cache.insert("new", 2);

        assert_eq!(cache.sweep(), 0);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.sweep_at(later), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_runs_periodically() {
        let cache = Arc::new(InlineCache::new(Duration::from_millis(10)));
        cache.insert("q", 7u32);

        let handle = cache.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(cache.get("q").is_none());
        handle.abort();
    }
}
