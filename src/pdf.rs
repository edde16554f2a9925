//! PDF generation service
//!
//! Owns the lazily-created browser pool and runs the render stage of the
//! pipeline: acquire a tab, render, release, and retry exactly once after a
//! pool restart when the session was interrupted. The retry is transparent
//! to the client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::chrome::{
    self, is_session_interrupted, ChromeError, ChromePool, PoolStats,
};
use crate::config::Config;
use crate::params::RenderParams;

#[derive(Clone)]
pub struct PdfService {
    inner: Arc<PdfServiceInner>,
}

struct PdfServiceInner {
    config: Config,
    pool: AsyncMutex<Option<Arc<ChromePool>>>,
}

impl PdfService {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(PdfServiceInner {
                config,
                pool: AsyncMutex::new(None),
            }),
        }
    }

    /// The shared pool, created on first use. `Ok(None)` means the pool is
    /// disabled by configuration; construction errors are returned each time
    /// so a later attempt can succeed once the environment recovers.
    async fn pool(&self) -> Result<Option<Arc<ChromePool>>, ChromeError> {
        if self.inner.config.pdf.chrome_pool_size <= 0 {
            return Ok(None);
        }

        let mut pool = self.inner.pool.lock().await;
        if let Some(pool) = pool.as_ref() {
            return Ok(Some(pool.clone()));
        }

        let fresh = Arc::new(ChromePool::new(&self.inner.config).await?);
        *pool = Some(fresh.clone());
        Ok(Some(fresh))
    }

    /// Render the given params to PDF bytes, using the pool when enabled and
    /// a fresh browser per request otherwise.
    pub async fn generate(&self, params: &RenderParams) -> Result<Vec<u8>, ChromeError> {
        let deadline = Duration::from_secs(self.inner.config.pdf.timeout_secs);

        let pool = match self.pool().await? {
            Some(pool) => pool,
            None => {
                return chrome::render_with_fresh_browser(params, &self.inner.config.pdf, deadline)
                    .await
            }
        };

        let first = run_once(&pool, params, deadline).await;
        match first {
            Err(err) if is_session_interrupted(&err) => {
                tracing::warn!(
                    error = %err,
                    "Chrome session interrupted; restarting pool and retrying once"
                );
                if let Err(restart_err) = pool.restart().await {
                    tracing::warn!(error = %restart_err, "Chrome pool restart failed");
                }
                run_once(&pool, params, deadline).await
            }
            other => other,
        }
    }

    /// Pool observability snapshot, or `None` when the pool is disabled.
    /// Pool construction failure is an error so the stats endpoint can
    /// report it.
    pub async fn stats(&self) -> Result<Option<PoolStats>, ChromeError> {
        match self.pool().await? {
            Some(pool) => Ok(Some(pool.stats().await)),
            None => Ok(None),
        }
    }

    /// Shut the pool down at server exit. Idempotent.
    pub async fn close(&self) {
        let pool = self.inner.pool.lock().await.clone();
        if let Some(pool) = pool {
            pool.close().await;
        }
    }
}

/// One acquire/render/release round. Every acquired tab is released on every
/// path; cancellation returns the slot through the tab's drop.
async fn run_once(
    pool: &ChromePool,
    params: &RenderParams,
    deadline: Duration,
) -> Result<Vec<u8>, ChromeError> {
    let tab = pool.acquire().await?;
    let result = chrome::render_in_tab(tab.page(), params, deadline).await;
    pool.release(tab).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_pool_reports_none_stats() {
        let mut config = Config::default();
        config.pdf.chrome_pool_size = 0;

        let service = PdfService::new(config);
        let stats = service.stats().await.expect("stats");
        assert!(stats.is_none());
    }

    #[tokio::test]
    async fn close_without_pool_is_a_no_op() {
        let mut config = Config::default();
        config.pdf.chrome_pool_size = 0;

        let service = PdfService::new(config);
        service.close().await;
    }
}
