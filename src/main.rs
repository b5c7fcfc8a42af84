//! shm_webcache - A small web server with a cross-process content cache
//!
//! Owns the shared segment for its lifetime: initializes it before serving
//! and tears it down after the last connection has drained.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shm_webcache::{create_router, AppState, Config};

/// Main entry point for the caching web server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Initialize the shared segment (fatal on failure)
/// 4. Create Axum router with all endpoints
/// 5. Start HTTP server on configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
/// 7. Tear down the shared segment
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shm_webcache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting shm_webcache server");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Configuration loaded: role={}, size_limit={}, port={}, webroot={}, segment={} in {}, eviction={}, fetch_mode={}",
        config.role,
        config.size_limit,
        config.server_port,
        config.webroot.display(),
        config.segment_name,
        config.segment_dir.display(),
        config.eviction,
        config.fetch_mode
    );

    let state = AppState::from_config(&config).context("cannot open shared segment")?;
    let cache = state.cache.clone();

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if !cache.segment().is_owner() {
        info!("Worker detached from shared segment '{}'", config.segment_name);
        info!("Server shutdown complete");
        return Ok(());
    }

    match Arc::try_unwrap(cache) {
        Ok(cache) => {
            let released = cache.teardown().context("cannot tear down shared segment")?;
            info!("Released {} cached entries", released);
        }
        Err(_) => warn!("Cache still referenced at shutdown; shared segment left for next start"),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
