//! Response models for the cache server's JSON endpoints
//!
//! Content requests are answered with raw bytes; only the `/_cache/*`
//! endpoints serialize these DTOs.

pub mod responses;

// Re-export commonly used types
pub use responses::{EntryResponse, HealthResponse, StatsResponse};
