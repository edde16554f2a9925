//! Browser-process pool
//!
//! One long-lived Chromium process serves up to `capacity` concurrent tabs.
//! Tab slots are tokens in a bounded semaphore; every acquired slot must be
//! released exactly once. A restart supersedes all outstanding tabs by
//! bumping the pool generation: a release from an older generation drops its
//! token instead of returning it, because the restart already refilled the
//! semaphore.
//!
//! Lifecycle: the pool is created lazily on first use, recreated internally
//! on [`ChromePool::restart`] without invalidating the outer handle, and torn
//! down (browser process killed, profile directory removed) on
//! [`ChromePool::close`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Browser;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use super::render::{launch_browser, TEARDOWN_TIMEOUT};
use super::ChromeError;
use crate::config::{Config, PdfConfig};

/// Deadline for taking a tab slot from the semaphore.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// A slot token plus the generation it was stamped with at acquire time.
#[derive(Debug)]
pub(crate) struct Slot {
    permit: OwnedSemaphorePermit,
    generation: u64,
}

#[derive(Debug)]
struct SlotState {
    sem: Arc<Semaphore>,
    generation: u64,
    dropped_releases: u64,
    closed: bool,
}

/// Semaphore bookkeeping for tab slots, separated from the browser process
/// so the accounting is testable on its own.
#[derive(Debug)]
pub(crate) struct SlotPool {
    capacity: usize,
    state: Mutex<SlotState>,
}

impl SlotPool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(SlotState {
                sem: Arc::new(Semaphore::new(capacity)),
                generation: 0,
                dropped_releases: 0,
                closed: false,
            }),
        }
    }

    async fn acquire(&self, deadline: Duration) -> Result<Slot, ChromeError> {
        let (sem, generation) = {
            let state = self.state.lock();
            if state.closed {
                return Err(ChromeError::PoolClosed);
            }
            (state.sem.clone(), state.generation)
        };

        match timeout(deadline, sem.acquire_owned()).await {
            Err(_) => Err(ChromeError::AcquireTimeout),
            Ok(Err(_)) => Err(ChromeError::PoolClosed),
            Ok(Ok(permit)) => Ok(Slot { permit, generation }),
        }
    }

    fn release(&self, slot: Slot) {
        let Slot { permit, generation } = slot;
        let mut state = self.state.lock();
        if generation != state.generation {
            // The restart that superseded this slot already produced its
            // replacement token.
            state.dropped_releases += 1;
            permit.forget();
        } else if state.closed {
            permit.forget();
        }
        // Dropping the permit otherwise returns the token to the semaphore.
    }

    /// Start a new generation with a full set of tokens.
    fn refill(&self) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.sem = Arc::new(Semaphore::new(self.capacity));
        state.generation
    }

    /// Returns false when the pool was already closed.
    fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        true
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn idle(&self) -> usize {
        self.state.lock().sem.available_permits()
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn dropped_releases(&self) -> u64 {
        self.state.lock().dropped_releases
    }
}

/// An exclusively-owned tab, alive between acquire and release.
pub struct PooledTab {
    page: chromiumoxide::Page,
    slot: Option<Slot>,
}

impl PooledTab {
    pub fn page(&self) -> &chromiumoxide::Page {
        &self.page
    }

    pub fn generation(&self) -> u64 {
        self.slot.as_ref().map(|s| s.generation).unwrap_or(0)
    }
}

impl Drop for PooledTab {
    fn drop(&mut self) {
        if self.slot.take().is_some() {
            // The owning render was cancelled before it could release the
            // tab. The permit returns via its own drop; the tab itself is
            // closed in the background.
            let page = self.page.clone();
            tokio::spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

#[derive(Debug)]
struct BrowserRuntime {
    browser: Arc<AsyncMutex<Browser>>,
    event_loop: JoinHandle<()>,
    profile_dir: PathBuf,
}

/// Pool of tabs attached to one managed Chromium process.
#[derive(Debug)]
pub struct ChromePool {
    pdf_cfg: PdfConfig,
    capacity: usize,
    slots: SlotPool,
    runtime: AsyncMutex<Option<BrowserRuntime>>,
    restarts: AtomicU64,
    last_restart: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time pool observability snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub enabled: bool,
    pub capacity: usize,
    pub idle: usize,
    pub in_use: usize,
    pub profile_dir: String,
    pub restarts: u64,
    pub last_restart: Option<DateTime<Utc>>,
    pub dropped_releases: u64,
}

impl ChromePool {
    /// Launch the browser and warm it up. Fails with
    /// [`ChromeError::PoolDisabled`] when the configured size is not positive.
    pub async fn new(cfg: &Config) -> Result<Self, ChromeError> {
        if cfg.pdf.chrome_pool_size <= 0 {
            return Err(ChromeError::PoolDisabled);
        }
        let capacity = cfg.pdf.chrome_pool_size as usize;
        let runtime = start_runtime(&cfg.pdf).await?;

        tracing::info!(
            capacity,
            profile_dir = %runtime.profile_dir.display(),
            "Chrome pool ready"
        );

        Ok(Self {
            pdf_cfg: cfg.pdf.clone(),
            capacity,
            slots: SlotPool::new(capacity),
            runtime: AsyncMutex::new(Some(runtime)),
            restarts: AtomicU64::new(0),
            last_restart: Mutex::new(None),
        })
    }

    /// Take a tab slot and open a fresh tab in the current browser. Waits up
    /// to five seconds for a free slot, then fails with
    /// [`ChromeError::AcquireTimeout`].
    pub async fn acquire(&self) -> Result<PooledTab, ChromeError> {
        let slot = self.slots.acquire(ACQUIRE_TIMEOUT).await?;

        let browser = {
            let runtime = self.runtime.lock().await;
            match runtime.as_ref() {
                Some(rt) => rt.browser.clone(),
                None => {
                    self.slots.release(slot);
                    return Err(if self.slots.is_closed() {
                        ChromeError::PoolClosed
                    } else {
                        // A failed restart left no browser behind.
                        ChromeError::BrowserGone
                    });
                }
            }
        };

        let page = {
            let browser = browser.lock().await;
            browser.new_page("about:blank").await
        };

        match page {
            Ok(page) => Ok(PooledTab {
                page,
                slot: Some(slot),
            }),
            Err(err) => {
                self.slots.release(slot);
                Err(err.into())
            }
        }
    }

    /// Close the tab and return its slot. A slot from a superseded
    /// generation is dropped instead; the counter for those drops shows up
    /// in [`ChromePool::stats`].
    pub async fn release(&self, mut tab: PooledTab) {
        let slot = tab.slot.take();
        let page = tab.page.clone();
        drop(tab);

        let _ = page.close().await;
        if let Some(slot) = slot {
            self.slots.release(slot);
        }
    }

    /// Tear the browser down and bring up a replacement. Outstanding tabs
    /// are superseded; their releases become no-ops. Callers observe either
    /// a serving pool or an error.
    pub async fn restart(&self) -> Result<(), ChromeError> {
        if self.slots.is_closed() {
            return Err(ChromeError::PoolClosed);
        }

        let mut runtime = self.runtime.lock().await;
        let generation = self.slots.refill();
        if let Some(old) = runtime.take() {
            shutdown_runtime(old).await;
        }

        let fresh = start_runtime(&self.pdf_cfg).await?;
        tracing::warn!(
            generation,
            profile_dir = %fresh.profile_dir.display(),
            "Chrome pool restarted"
        );
        *runtime = Some(fresh);

        self.restarts.fetch_add(1, Ordering::Relaxed);
        *self.last_restart.lock() = Some(Utc::now());
        Ok(())
    }

    /// Idempotent shutdown: kills the browser, removes the profile
    /// directory, and fails all subsequent acquires.
    pub async fn close(&self) {
        if !self.slots.close() {
            return;
        }
        let mut runtime = self.runtime.lock().await;
        if let Some(rt) = runtime.take() {
            shutdown_runtime(rt).await;
        }
        tracing::info!("Chrome pool closed");
    }

    pub async fn stats(&self) -> PoolStats {
        let profile_dir = self
            .runtime
            .lock()
            .await
            .as_ref()
            .map(|rt| rt.profile_dir.display().to_string())
            .unwrap_or_default();

        let idle = self.slots.idle();
        PoolStats {
            enabled: !self.slots.is_closed(),
            capacity: self.capacity,
            idle,
            in_use: self.capacity.saturating_sub(idle),
            profile_dir,
            restarts: self.restarts.load(Ordering::Relaxed),
            last_restart: *self.last_restart.lock(),
            dropped_releases: self.slots.dropped_releases(),
        }
    }
}

async fn start_runtime(cfg: &PdfConfig) -> Result<BrowserRuntime, ChromeError> {
    let profile_dir = create_profile_dir(cfg)?;

    let (browser, event_loop) = match launch_browser(cfg, &profile_dir).await {
        Ok(pair) => pair,
        Err(err) => {
            let _ = std::fs::remove_dir_all(&profile_dir);
            return Err(err);
        }
    };

    let runtime = BrowserRuntime {
        browser: Arc::new(AsyncMutex::new(browser)),
        event_loop,
        profile_dir,
    };

    // Warm-up: open and close one tab so startup errors surface here
    // instead of on the first request.
    if let Err(err) = warmup(&runtime.browser).await {
        shutdown_runtime(runtime).await;
        return Err(err);
    }

    Ok(runtime)
}

async fn warmup(browser: &Arc<AsyncMutex<Browser>>) -> Result<(), ChromeError> {
    let page = {
        let browser = browser.lock().await;
        browser.new_page("about:blank").await?
    };
    page.close().await?;
    Ok(())
}

async fn shutdown_runtime(runtime: BrowserRuntime) {
    let BrowserRuntime {
        browser,
        event_loop,
        profile_dir,
    } = runtime;

    {
        let mut browser = browser.lock().await;
        // Graceful close must happen while the event loop still drains
        // messages; the hard kill is the drop path below.
        let _ = timeout(TEARDOWN_TIMEOUT, browser.close()).await;
        let _ = timeout(TEARDOWN_TIMEOUT, browser.wait()).await;
    }
    event_loop.abort();
    drop(browser);

    if let Err(err) = tokio::fs::remove_dir_all(&profile_dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(
                error = %err,
                dir = %profile_dir.display(),
                "Failed to remove profile dir"
            );
        }
    }
}

/// Create a private, uniquely-named profile directory under the configured
/// base (or the OS temp root), creating the base first.
pub(crate) fn create_profile_dir(cfg: &PdfConfig) -> Result<PathBuf, ChromeError> {
    let base = if cfg.user_data_dir.is_empty() {
        std::env::temp_dir()
    } else {
        PathBuf::from(&cfg.user_data_dir)
    };
    std::fs::create_dir_all(&base)?;

    let dir = base.join(format!("chromedata-{}", Uuid::new_v4()));
    std::fs::create_dir(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_restore_idle_count() {
        let slots = SlotPool::new(2);
        assert_eq!(slots.idle(), 2);

        let slot = slots.acquire(Duration::from_secs(1)).await.expect("slot");
        assert_eq!(slots.idle(), 1);

        slots.release(slot);
        assert_eq!(slots.idle(), 2);
        assert_eq!(slots.dropped_releases(), 0);
    }

    #[tokio::test]
    async fn release_across_generations_drops_the_token() {
        let slots = SlotPool::new(1);
        let slot = slots.acquire(Duration::from_secs(1)).await.expect("slot");
        assert_eq!(slots.idle(), 0);

        // A restart refills the semaphore and supersedes the slot.
        slots.refill();
        assert_eq!(slots.idle(), 1);

        slots.release(slot);
        assert_eq!(slots.idle(), 1);
        assert_eq!(slots.dropped_releases(), 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_no_capacity() {
        let slots = SlotPool::new(1);
        let _held = slots.acquire(Duration::from_secs(1)).await.expect("slot");

        let err = slots
            .acquire(Duration::from_millis(10))
            .await
            .expect_err("no free slot");
        assert!(matches!(err, ChromeError::AcquireTimeout));
    }

    #[tokio::test]
    async fn acquire_fails_fast_when_closed() {
        let slots = SlotPool::new(1);
        assert!(slots.close());
        assert!(!slots.close());

        let err = slots
            .acquire(Duration::from_secs(1))
            .await
            .expect_err("closed");
        assert!(matches!(err, ChromeError::PoolClosed));
    }

    #[tokio::test]
    async fn refill_bumps_generation() {
        let slots = SlotPool::new(3);
        assert_eq!(slots.generation(), 0);
        assert_eq!(slots.refill(), 1);
        assert_eq!(slots.refill(), 2);
        assert_eq!(slots.idle(), 3);
    }

    #[tokio::test]
    async fn disabled_pool_size_rejected() {
        let mut cfg = Config::default();
        cfg.pdf.chrome_pool_size = 0;
        let err = ChromePool::new(&cfg).await.expect_err("disabled");
        assert!(matches!(err, ChromeError::PoolDisabled));

        cfg.pdf.chrome_pool_size = -1;
        let err = ChromePool::new(&cfg).await.expect_err("disabled");
        assert!(matches!(err, ChromeError::PoolDisabled));
    }

    #[test]
    fn profile_dir_under_default_and_custom_base() {
        let cfg = PdfConfig::default();
        let dir = create_profile_dir(&cfg).expect("default base");
        assert!(dir.exists());
        assert!(dir.starts_with(std::env::temp_dir()));
        let _ = std::fs::remove_dir_all(&dir);

        let base = tempfile::tempdir().expect("base");
        let cfg = PdfConfig {
            user_data_dir: base.path().display().to_string(),
            ..PdfConfig::default()
        };
        let dir = create_profile_dir(&cfg).expect("custom base");
        assert_eq!(dir.parent(), Some(base.path()));
    }

    #[test]
    fn profile_dir_invalid_base_fails() {
        let cfg = PdfConfig {
            user_data_dir: "/dev/null/not-a-dir".to_string(),
            ..PdfConfig::default()
        };
        assert!(create_profile_dir(&cfg).is_err());
    }
}
