//! In-process coordination store
//!
//! Backs small deployments and tests. Entries live in a sharded concurrent
//! map; expiry is enforced on every read, so behavior is correct even if the
//! background sweeper never runs. The sweeper only reclaims memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::{CoordinationStore, StoreError};

/// How often the sweeper reclaims expired entries. One tenth of the shortest
/// TTL in the system (deletion challenges, 180 s).
const SWEEP_PERIOD: Duration = Duration::from_secs(18);

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process TTL key/value store.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Spawn the background sweeper. Returns the spawned task handle; dropping
    /// it does not stop the sweep, aborting it does.
    pub fn start_sweeper(store: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, "Swept expired coordination entries");
                }
            }
        })
    }

    /// Remove every expired entry; returns how many were reclaimed.
    pub fn sweep(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().is_expired().then(|| entry.key().clone()))
            .collect();

        let count = expired.len();
        for key in expired {
            // Re-check under the shard lock; a writer may have refreshed the key
            self.entries.remove_if(&key, |_, v| v.is_expired());
        }
        count
    }

    /// Number of live (unexpired) entries. Test and diagnostics helper.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().is_expired()).count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.entries.remove_if(key, |_, v| v.is_expired());
                Err(StoreError::NotFound)
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn take(&self, key: &str) -> Result<String, StoreError> {
        // DashMap::remove is atomic per key: concurrent takers race for the
        // single removal and the losers see NotFound.
        match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired() => Ok(entry.value),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired() && e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}
