//! API Routes
//!
//! Configures the Axum router with the inspection endpoints and the content
//! fallback.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{
    entries_handler, health_handler, serve_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /_cache/stats` - Shared cache statistics
/// - `GET /_cache/entries` - Occupied cache slots
/// - `GET /_cache/health` - Health check endpoint
/// - fallback - Cached content
///
/// # Middleware
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/_cache/stats", get(stats_handler))
        .route("/_cache/entries", get(entries_handler))
        .route("/_cache/health", get(health_handler))
        .fallback(serve_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
