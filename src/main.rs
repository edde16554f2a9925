//! html2pdf-server binary
//!
//! Startup order: config, result cache, token store (initial load plus the
//! periodic reloader), rate gate, then the HTTP listener. SIGINT/SIGTERM
//! trigger a graceful drain bounded at five seconds; a clean shutdown exits
//! zero, fatal init failures exit non-zero.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use html2pdf_server::app::router;
use html2pdf_server::cache::PdfCache;
use html2pdf_server::config::Config;
use html2pdf_server::ratelimit::RateGate;
use html2pdf_server::state::AppState;
use html2pdf_server::tokens::TokenStore;

/// Grace period for draining in-flight requests after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "html2pdf_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Container environments commonly set CHROME_BIN instead of editing the
    // config file; it only overrides an empty configured path.
    if config.pdf.chrome_path.is_empty() {
        if let Ok(path) = std::env::var("CHROME_BIN") {
            if !path.is_empty() {
                config.pdf.chrome_path = path;
            }
        }
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pool_size = config.pdf.chrome_pool_size,
        "Starting html2pdf-server"
    );

    let cache = if config.cache.enabled {
        match PdfCache::connect(&config.cache.redis_url, config.cache.ttl_secs).await {
            Ok(cache) => {
                tracing::info!(url = %config.cache.redis_url, "PDF cache connected");
                Some(cache)
            }
            Err(err) => {
                tracing::warn!(error = %err, "PDF cache unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };

    let tokens = TokenStore::new(&config.auth.database_url);
    match tokens.load_once().await {
        Ok(count) => tracing::info!(tokens = count, "Loaded API tokens"),
        Err(err) => tracing::error!(error = %err, "Failed to load API tokens"),
    }
    let reloader = tokens.start(Duration::from_secs(config.auth.reload_secs.max(1)));

    let rate_gate = RateGate::connect(&config.rate_limiter, &config.cache.rate_limit_redis_url).await;

    let state = AppState::new(config.clone(), cache, tokens, rate_gate);
    let app = router(state.clone());

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::error!(error = %err, "Invalid listen address");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr = %addr, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %addr, "html2pdf-server listening");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = serve.await {
        tracing::error!(error = %err, "Server error");
        std::process::exit(1);
    }

    reloader.abort();
    state.pdf().close().await;
    tracing::info!("Server stopped cleanly");
}

/// Resolve on SIGINT or SIGTERM. Once a signal lands, a watchdog bounds the
/// drain: if connections have not finished within the grace period the
/// process exits anyway, still cleanly.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Received Ctrl+C, closing server...");
        },
        _ = terminate => {
            tracing::warn!("Received SIGTERM, closing server...");
        },
    }

    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::warn!("Drain deadline reached, exiting");
        std::process::exit(0);
    });
}
