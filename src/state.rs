//! Application state management

use std::sync::Arc;

use crate::cache::PdfCache;
use crate::config::Config;
use crate::pdf::PdfService;
use crate::ratelimit::RateGate;
use crate::tokens::TokenStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    /// `None` when caching is disabled or Redis was unreachable at startup.
    cache: Option<PdfCache>,
    tokens: TokenStore,
    rate_gate: RateGate,
    pdf: PdfService,
}

impl AppState {
    pub fn new(
        config: Config,
        cache: Option<PdfCache>,
        tokens: TokenStore,
        rate_gate: RateGate,
    ) -> Self {
        let pdf = PdfService::new(config.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                cache,
                tokens,
                rate_gate,
                pdf,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn cache(&self) -> Option<&PdfCache> {
        self.inner.cache.as_ref()
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn rate_gate(&self) -> &RateGate {
        &self.inner.rate_gate
    }

    pub fn pdf(&self) -> &PdfService {
        &self.inner.pdf
    }
}
