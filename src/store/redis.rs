//! Redis-backed coordination store
//!
//! Shared-deployment backend. TTLs ride on Redis key expiry (`SET .. EX`),
//! `take` maps to `GETDEL` so one-shot semantics hold across replicas, and
//! prefix listing uses cursor-based `SCAN` to stay off the keyspace-blocking
//! `KEYS` command.

use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::debug;

use super::{CoordinationStore, StoreError};

/// Coordination store backed by a shared Redis service.
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url` (`redis://[:pass@]host:port/db`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is malformed or the
    /// initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("redis url: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis connect: {e}")))?;
        debug!("Connected coordination store to redis");
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn unavailable(e: &redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait::async_trait]
impl CoordinationStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn();
        // Redis expiry has whole-second resolution; round sub-second TTLs up
        let secs = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(&e))?;
        value.ok_or(StoreError::NotFound)
    }

    async fn take(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.conn();
        // GETDEL is atomic server-side: concurrent takers get one winner
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(&e))?;
        value.ok_or(StoreError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable(&e))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}
