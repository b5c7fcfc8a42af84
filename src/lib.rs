//! shm_webcache - A small web server with a cross-process content cache
//!
//! Resource bytes are cached in named shared memory so every worker process
//! attached to the same segment answers from one size-bounded table. Misses
//! are populated from the local webroot or from a remote origin named in the
//! query string.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod origin;

pub use api::{create_router, AppState};
pub use cache::{CacheManager, SharedSegment};
pub use config::Config;
pub use error::{CacheError, Result};
