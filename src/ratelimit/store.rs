//! Rate-limit counter storage
//!
//! Counters live in a shared Redis store so budgets hold across replicas;
//! when Redis is unavailable at startup the engine falls back to this
//! process's memory. Each counter is keyed by (limiter key, window start)
//! and expires two windows after creation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Storage backend for sliding-window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for (key, window) and return the new value.
    /// Implementations expire the counter after `ttl`.
    async fn incr(&self, key: &str, window: i64, ttl: Duration) -> Result<u64, StoreError>;

    /// Read the counter for (key, window); absent counters read as zero.
    async fn get(&self, key: &str, window: i64) -> Result<u64, StoreError>;
}

fn counter_key(key: &str, window: i64) -> String {
    format!("ratelimit:{key}:{window}")
}

/// Redis-backed counter store shared across processes.
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, window: i64, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let k = counter_key(key, window);
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&k, 1)
            .expire(&k, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str, window: i64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(counter_key(key, window)).await?;
        Ok(count.unwrap_or(0))
    }
}

/// Process-local counter store. Counters are not shared across replicas;
/// used only when the Redis store cannot be constructed.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(entries: &mut HashMap<String, (u64, Instant)>, now: Instant) {
        entries.retain(|_, (_, expires)| *expires > now);
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, window: i64, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, now);

        let entry = entries
            .entry(counter_key(key, window))
            .or_insert((0, now + ttl));
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn get(&self, key: &str, window: i64) -> Result<u64, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(entries
            .get(&counter_key(key, window))
            .filter(|(_, expires)| *expires > now)
            .map(|(count, _)| *count)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_counts_per_window() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.incr("k", 100, ttl).await.unwrap(), 1);
        assert_eq!(store.incr("k", 100, ttl).await.unwrap(), 2);
        assert_eq!(store.incr("k", 160, ttl).await.unwrap(), 1);

        assert_eq!(store.get("k", 100).await.unwrap(), 2);
        assert_eq!(store.get("k", 160).await.unwrap(), 1);
        assert_eq!(store.get("k", 220).await.unwrap(), 0);
        assert_eq!(store.get("other", 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_store_expires_counters() {
        let store = MemoryCounterStore::new();

        store
            .incr("k", 100, Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("k", 100).await.unwrap(), 0);
    }
}
