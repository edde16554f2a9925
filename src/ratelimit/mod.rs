//! Rate-limit engine
//!
//! Sliding-window limiting over a shared counter store. Two limiters run in
//! sequence at request entry: a per-key limiter for authenticated requests
//! whose key carries a non-zero budget, and an anonymous limiter keyed by
//! `sha256(client_ip ‖ user_agent)` for keyless requests. A valid API key
//! bypasses the anonymous limiter entirely.
//!
//! Limiter instances are cached per distinct integer limit — many keys share
//! a limit value, so per-key instances would be wasteful. Counter-store
//! failures at decision time fail open: limiting is protective, not
//! load-bearing.

mod store;

pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::config::RateLimiterConfig;

/// A sliding-window limiter for one fixed limit. The current count is the
/// weighted interpolation of the previous and current fixed windows.
pub struct SlidingWindow {
    limit: u32,
    interval: Duration,
    store: Arc<dyn CounterStore>,
}

impl SlidingWindow {
    pub fn new(limit: u32, interval: Duration, store: Arc<dyn CounterStore>) -> Self {
        Self {
            limit,
            interval,
            store,
        }
    }

    /// Record a hit for `key` and decide whether it is within budget.
    pub async fn allow(&self, key: &str) -> bool {
        let interval_secs = self.interval.as_secs().max(1) as i64;
        let now = unix_now();
        let current = now - now.rem_euclid(interval_secs);
        let previous = current - interval_secs;
        let ttl = self.interval * 2;

        let current_count = match self.store.incr(key, current, ttl).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(error = %err, "Rate-limit counter increment failed");
                return true;
            }
        };
        let previous_count = match self.store.get(key, previous).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(error = %err, "Rate-limit counter read failed");
                0
            }
        };

        let elapsed = (now - current) as f64 / interval_secs as f64;
        let weighted = previous_count as f64 * (1.0 - elapsed) + current_count as f64;
        weighted <= self.limit as f64
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The request-entry rate gate: per-key limiter cache plus the anonymous
/// limiter.
#[derive(Clone)]
pub struct RateGate {
    inner: Arc<RateGateInner>,
}

struct RateGateInner {
    interval: Duration,
    store: Arc<dyn CounterStore>,
    /// One limiter per distinct limit value, installed on first sight.
    limiters: RwLock<HashMap<u32, Arc<SlidingWindow>>>,
    anonymous: Option<SlidingWindow>,
}

impl RateGate {
    /// Build a gate over an explicit counter store.
    pub fn with_store(cfg: &RateLimiterConfig, store: Arc<dyn CounterStore>) -> Self {
        let interval = Duration::from_secs(cfg.interval_secs.max(1));
        let anonymous = (cfg.user_limit > 0)
            .then(|| SlidingWindow::new(cfg.user_limit, interval, store.clone()));
        Self {
            inner: Arc::new(RateGateInner {
                interval,
                store,
                limiters: RwLock::new(HashMap::new()),
                anonymous,
            }),
        }
    }

    /// Build a gate backed by Redis, falling back to process-local memory
    /// when the Redis store cannot be constructed. The fallback is logged,
    /// never fatal; in that mode replicas do not share counters.
    pub async fn connect(cfg: &RateLimiterConfig, redis_url: &str) -> Self {
        let store: Arc<dyn CounterStore> = match tokio::time::timeout(
            Duration::from_secs(3),
            RedisCounterStore::connect(redis_url),
        )
        .await
        {
            Ok(Ok(store)) => {
                tracing::info!(url = %redis_url, "Using Redis for rate limiting");
                Arc::new(store)
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "Redis limiter store init failed, falling back to memory");
                Arc::new(MemoryCounterStore::new())
            }
            Err(_) => {
                tracing::error!("Redis limiter store init timed out, falling back to memory");
                Arc::new(MemoryCounterStore::new())
            }
        };
        Self::with_store(cfg, store)
    }

    /// Apply the per-key limiter. Limits of zero or below pass through.
    pub async fn check_key(&self, key: &str, limit: i32) -> bool {
        if limit <= 0 {
            return true;
        }
        self.limiter_for(limit as u32).allow(key).await
    }

    /// Whether the anonymous limiter is configured at all.
    pub fn anonymous_enabled(&self) -> bool {
        self.inner.anonymous.is_some()
    }

    /// Apply the anonymous limiter for a keyless request.
    pub async fn check_anonymous(&self, client_ip: &str, user_agent: &str) -> bool {
        match &self.inner.anonymous {
            Some(limiter) => limiter.allow(&anonymous_key(client_ip, user_agent)).await,
            None => true,
        }
    }

    /// Fetch or install the limiter for a limit value. Double-checked under
    /// the write lock so concurrent first sightings install exactly one.
    fn limiter_for(&self, limit: u32) -> Arc<SlidingWindow> {
        if let Some(limiter) = self.inner.limiters.read().get(&limit) {
            return limiter.clone();
        }

        let mut limiters = self.inner.limiters.write();
        limiters
            .entry(limit)
            .or_insert_with(|| {
                Arc::new(SlidingWindow::new(
                    limit,
                    self.inner.interval,
                    self.inner.store.clone(),
                ))
            })
            .clone()
    }
}

/// Limiter key for unauthenticated clients.
pub fn anonymous_key(client_ip: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_ip.as_bytes());
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(user_limit: u32, interval_secs: u64) -> (RateGate, Arc<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        let cfg = RateLimiterConfig {
            interval_secs,
            user_limit,
            enable_user_limiter: user_limit > 0,
        };
        (RateGate::with_store(&cfg, store.clone()), store)
    }

    #[tokio::test]
    async fn per_key_limit_allows_then_denies() {
        // An hour-long window keeps the previous-window weight at zero for
        // the duration of the test.
        let (gate, _) = gate(0, 3600);

        assert!(gate.check_key("tok", 2).await);
        assert!(gate.check_key("tok", 2).await);
        assert!(!gate.check_key("tok", 2).await);
    }

    #[tokio::test]
    async fn zero_limit_passes_through() {
        let (gate, store) = gate(0, 3600);

        for _ in 0..10 {
            assert!(gate.check_key("tok", 0).await);
        }
        // Pass-through must not touch the store.
        let now = unix_now();
        let window = now - now.rem_euclid(3600);
        assert_eq!(store.get("tok", window).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keys_count_independently() {
        let (gate, _) = gate(0, 3600);

        assert!(gate.check_key("a", 1).await);
        assert!(!gate.check_key("a", 1).await);
        assert!(gate.check_key("b", 1).await);
    }

    #[tokio::test]
    async fn limiter_instances_are_cached_per_limit() {
        let (gate, _) = gate(0, 3600);

        let first = gate.limiter_for(7);
        let second = gate.limiter_for(7);
        assert!(Arc::ptr_eq(&first, &second));

        let other = gate.limiter_for(8);
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn anonymous_limiter_enforced_when_enabled() {
        let (gate, _) = gate(1, 3600);
        assert!(gate.anonymous_enabled());

        assert!(gate.check_anonymous("1.2.3.4", "test-agent").await);
        assert!(!gate.check_anonymous("1.2.3.4", "test-agent").await);
        // A different client hashes to a different counter.
        assert!(gate.check_anonymous("5.6.7.8", "test-agent").await);
    }

    #[tokio::test]
    async fn anonymous_limiter_disabled_by_default() {
        let (gate, _) = gate(0, 3600);
        assert!(!gate.anonymous_enabled());
        for _ in 0..5 {
            assert!(gate.check_anonymous("1.2.3.4", "test-agent").await);
        }
    }

    #[test]
    fn anonymous_key_is_stable_and_distinct() {
        let a = anonymous_key("1.2.3.4", "agent");
        assert_eq!(a, anonymous_key("1.2.3.4", "agent"));
        assert_ne!(a, anonymous_key("1.2.3.5", "agent"));
        assert_ne!(a, anonymous_key("1.2.3.4", "other"));
        assert_eq!(a.len(), 64);
    }
}
