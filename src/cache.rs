//! Redis-backed result cache
//!
//! Caching is advisory: every operation is bounded by its own one-second
//! deadline independent of the request deadline, a miss is not an error, and
//! Redis failures are logged at warn level and otherwise ignored.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::timeout;

/// Deadline for a single cache round-trip.
const OP_TIMEOUT: Duration = Duration::from_secs(1);

/// TTL used when the configured TTL is non-positive.
const FALLBACK_TTL_SECS: i64 = 60;

/// Client for the external PDF result cache.
#[derive(Clone)]
pub struct PdfCache {
    conn: ConnectionManager,
    ttl_secs: i64,
}

impl PdfCache {
    /// Connect to Redis. Construction failure is surfaced so the caller can
    /// decide to run without a cache.
    pub async fn connect(redis_url: &str, ttl_secs: i64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, ttl_secs })
    }

    /// Fetch a cached PDF. Returns `None` on miss, timeout or error.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.conn.clone();
        match timeout(OP_TIMEOUT, conn.get::<_, Option<Vec<u8>>>(key)).await {
            Ok(Ok(Some(bytes))) => {
                tracing::info!(key = %key, "PDF cache hit");
                Some(bytes)
            }
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Redis read failed");
                None
            }
            Err(_) => {
                tracing::warn!(key = %key, "Redis read timed out");
                None
            }
        }
    }

    /// Store a PDF with the configured TTL. Errors are swallowed.
    pub async fn set(&self, key: &str, data: &[u8]) {
        let ttl = effective_ttl(self.ttl_secs);
        let mut conn = self.conn.clone();
        match timeout(
            OP_TIMEOUT,
            conn.set_ex::<_, _, ()>(key, data, ttl.as_secs()),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "Redis write failed"),
            Err(_) => tracing::warn!(key = %key, "Redis write timed out"),
        }
    }
}

/// Normalize a configured TTL: non-positive values fall back to one minute.
fn effective_ttl(ttl_secs: i64) -> Duration {
    if ttl_secs <= 0 {
        Duration::from_secs(FALLBACK_TTL_SECS as u64)
    } else {
        Duration::from_secs(ttl_secs as u64)
    }
}
