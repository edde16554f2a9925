//! API token store
//!
//! Keeps an in-memory map of API key to rate limit, loaded from the Postgres
//! control-plane table and refreshed periodically. The map is replaced
//! wholesale under a write lock, never merged, so readers observe either the
//! old or the new table in its entirety. Until the first successful load the
//! store reports not-ready and key-bearing requests are answered with 503
//! upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Connect/ping budget for the control-plane database.
const DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Budget for a full token load query.
const LOAD_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
    token       TEXT PRIMARY KEY,
    rate_limit  INTEGER NOT NULL DEFAULT 60,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    comment     TEXT
);
"#;

const SCHEMA_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_tokens_created_at ON tokens (created_at);";

/// Errors from the token store's database path.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token database timed out")]
    Timeout,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// In-memory token cache backed by Postgres.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<TokenStoreInner>,
}

struct TokenStoreInner {
    database_url: String,
    pool: OnceCell<PgPool>,
    /// `None` until the first successful load.
    cache: RwLock<Option<HashMap<String, i32>>>,
}

impl TokenStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TokenStoreInner {
                database_url: database_url.into(),
                pool: OnceCell::new(),
                cache: RwLock::new(None),
            }),
        }
    }

    /// Build a store pre-populated from a map. Intended for tests and local
    /// debugging; the store reports ready immediately.
    pub fn from_map(map: HashMap<String, i32>) -> Self {
        let store = Self::new("");
        store.replace(map);
        store
    }

    /// Lazily connect to Postgres and ensure the token schema exists. The
    /// control-plane table is small and low-throughput, so the pool is kept
    /// tiny.
    async fn db(&self) -> Result<&PgPool, TokenError> {
        self.inner
            .pool
            .get_or_try_init(|| async {
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(DB_CONNECT_TIMEOUT)
                    .connect(&self.inner.database_url)
                    .await?;
                sqlx::query(SCHEMA_SQL).execute(&pool).await?;
                sqlx::query(SCHEMA_INDEX_SQL).execute(&pool).await?;
                Ok::<_, sqlx::Error>(pool)
            })
            .await
            .map_err(TokenError::from)
    }

    /// Query the token table and atomically replace the in-memory map. On
    /// error the existing map is left intact.
    pub async fn load_once(&self) -> Result<usize, TokenError> {
        let pool = self.db().await?;

        let rows: Vec<(String, i32)> = timeout(
            LOAD_TIMEOUT,
            sqlx::query_as("SELECT token, rate_limit FROM tokens").fetch_all(pool),
        )
        .await
        .map_err(|_| TokenError::Timeout)??;

        let count = rows.len();
        self.replace(rows.into_iter().collect());
        Ok(count)
    }

    /// True once any load has succeeded.
    pub fn ready(&self) -> bool {
        self.inner.cache.read().is_some()
    }

    /// O(1) lookup of a key.
    pub fn validate(&self, key: &str) -> bool {
        self.inner
            .cache
            .read()
            .as_ref()
            .is_some_and(|cache| cache.contains_key(key))
    }

    /// The configured rate limit for a key, or 0 when the key is unknown
    /// (which disables per-key limiting for it).
    pub fn rate_limit(&self, key: &str) -> i32 {
        self.inner
            .cache
            .read()
            .as_ref()
            .and_then(|cache| cache.get(key).copied())
            .unwrap_or(0)
    }

    /// Spawn the periodic reloader. The task runs until the returned handle
    /// is aborted at shutdown.
    pub fn start(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would duplicate the startup load.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.load_once().await {
                    Ok(count) => tracing::debug!(tokens = count, "Reloaded API tokens"),
                    Err(err) => tracing::error!(error = %err, "Failed to reload API tokens"),
                }
            }
        })
    }

    fn replace(&self, map: HashMap<String, i32>) {
        *self.inner.cache.write() = Some(map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_first_load() {
        let store = TokenStore::new("postgres://unused");
        assert!(!store.ready());
        assert!(!store.validate("tok"));
        assert_eq!(store.rate_limit("tok"), 0);
    }

    #[test]
    fn from_map_is_ready_and_validates() {
        let store = TokenStore::from_map(HashMap::from([
            ("alpha".to_string(), 60),
            ("beta".to_string(), 0),
        ]));

        assert!(store.ready());
        assert!(store.validate("alpha"));
        assert!(store.validate("beta"));
        assert!(!store.validate("gamma"));
        assert_eq!(store.rate_limit("alpha"), 60);
        assert_eq!(store.rate_limit("beta"), 0);
        assert_eq!(store.rate_limit("gamma"), 0);
    }

    #[test]
    fn replacement_is_wholesale() {
        let store = TokenStore::from_map(HashMap::from([("old".to_string(), 10)]));
        assert!(store.validate("old"));

        store.replace(HashMap::from([("new".to_string(), 20)]));

        // The old entry must be gone entirely, not merged.
        assert!(!store.validate("old"));
        assert!(store.validate("new"));
        assert_eq!(store.rate_limit("new"), 20);
    }
}
