//! Headless Chromium management
//!
//! [`pool`] owns the long-lived browser process and its bounded set of
//! attachable tabs; [`render`] drives a single tab from navigation to
//! print-to-PDF and provides the fresh-browser-per-request fallback used
//! when the pool is disabled.

mod pool;
mod render;

pub use pool::{ChromePool, PoolStats, PooledTab};
pub(crate) use render::{render_in_tab, render_with_fresh_browser};

use chromiumoxide::error::CdpError;
use thiserror::Error;

/// Errors from the browser pool and render path.
#[derive(Debug, Error)]
pub enum ChromeError {
    /// The configured pool size is zero or negative.
    #[error("chrome pool is disabled")]
    PoolDisabled,

    #[error("chrome pool is closed")]
    PoolClosed,

    /// The pool has no live browser, typically because a restart failed
    /// partway. The next restart attempt recovers it.
    #[error("browser is not running")]
    BrowserGone,

    /// No tab became free within the acquire deadline.
    #[error("timed out waiting for a free tab")]
    AcquireTimeout,

    /// The render exceeded the configured timeout.
    #[error("PDF rendering took too long")]
    RenderTimeout,

    /// The request was cancelled while a render was in flight.
    #[error("render cancelled")]
    Cancelled,

    #[error("failed to launch chrome: {0}")]
    Launch(String),

    #[error("profile directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cdp(#[from] CdpError),
}

/// Classify failures that indicate the browser target is no longer usable.
///
/// Covers cancellation, deadline expiry, and any error whose message names a
/// closed target. The substring test is the last-resort compatibility path;
/// the typed variants are preferred.
pub fn is_session_interrupted(err: &ChromeError) -> bool {
    match err {
        ChromeError::AcquireTimeout
        | ChromeError::RenderTimeout
        | ChromeError::Cancelled
        | ChromeError::BrowserGone => true,
        other => other.to_string().contains("target closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_cancellation_are_session_interruptions() {
        assert!(is_session_interrupted(&ChromeError::AcquireTimeout));
        assert!(is_session_interrupted(&ChromeError::RenderTimeout));
        assert!(is_session_interrupted(&ChromeError::Cancelled));
        assert!(is_session_interrupted(&ChromeError::BrowserGone));
    }

    #[test]
    fn target_closed_message_is_session_interruption() {
        let err = ChromeError::Launch("ws send failed: target closed".to_string());
        assert!(is_session_interrupted(&err));
    }

    #[test]
    fn unrelated_errors_are_not_session_interruptions() {
        assert!(!is_session_interrupted(&ChromeError::Launch(
            "validation failed".to_string()
        )));
        assert!(!is_session_interrupted(&ChromeError::PoolClosed));
        assert!(!is_session_interrupted(&ChromeError::PoolDisabled));
    }
}
