//! API Module
//!
//! HTTP handlers and routing for the caching web server.
//!
//! # Endpoints
//! - `GET /_cache/stats` - Shared cache statistics
//! - `GET /_cache/entries` - Occupied cache slots
//! - `GET /_cache/health` - Health check endpoint
//! - anything else - Content under the webroot, or from the origin named in
//!   the query string

pub mod handlers;
pub mod mime;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
