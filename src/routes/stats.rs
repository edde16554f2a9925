//! Chrome pool observability endpoint

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::chrome::PoolStats;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: PoolStats,
    pub pool_size_conf: i32,
    pub timeout_secs: u64,
}

/// Serialize the pool's stats plus the configured render timeout. A disabled
/// pool reports zeros; a pool that failed to initialize reports 500.
pub async fn chrome_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let pool_size_conf = state.config().pdf.chrome_pool_size;
    let timeout_secs = state.config().pdf.timeout_secs;

    let stats = match state.pdf().stats().await {
        Ok(Some(stats)) => stats,
        Ok(None) => disabled_stats(),
        Err(err) => {
            tracing::error!(error = %err, "Chrome pool init failed");
            return Err(AppError::Internal("Chrome pool init failed".to_string()));
        }
    };

    Ok(Json(StatsResponse {
        stats,
        pool_size_conf,
        timeout_secs,
    }))
}

fn disabled_stats() -> PoolStats {
    PoolStats {
        enabled: false,
        capacity: 0,
        idle: 0,
        in_use: 0,
        profile_dir: String::new(),
        restarts: 0,
        last_restart: None,
        dropped_releases: 0,
    }
}
