//! Error types for the cache and the server around it
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
///
/// Every variant is returned to the caller as-is; nothing in the cache
/// retries internally or turns an error into a partial result.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Local source resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Content does not fit within the configured size limit
    #[error("Content too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// Shared region, content block or lock could not be created or attached
    #[error("Shared memory allocation failed: {0}")]
    AllocationFailure(String),

    /// Name resolution or TCP connect to the origin failed
    #[error("Origin unreachable: {0}")]
    OriginUnreachable(String),

    /// Origin response had no header/body boundary or an empty body
    #[error("Origin protocol error: {0}")]
    ProtocolError(String),

    /// No free slot remained after eviction
    #[error("Cache capacity exhausted: no free slot after eviction")]
    CapacityExhausted,

    /// Query string names no usable origin
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    /// Local read failed after the resource was found
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Startup configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Returns true for errors after which the request can still be served
    /// straight from disk, bypassing the cache.
    pub fn allows_uncached_delivery(&self) -> bool {
        matches!(
            self,
            CacheError::AllocationFailure(_)
                | CacheError::TooLarge { .. }
                | CacheError::CapacityExhausted
        )
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CacheError::InvalidOrigin(_) => StatusCode::BAD_REQUEST,
            CacheError::OriginUnreachable(_) | CacheError::ProtocolError(_) => {
                StatusCode::BAD_GATEWAY
            }
            CacheError::CapacityExhausted | CacheError::AllocationFailure(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::Io(_) | CacheError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CacheError::NotFound("/x".into()), StatusCode::NOT_FOUND),
            (
                CacheError::TooLarge { size: 10, limit: 5 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                CacheError::OriginUnreachable("host".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CacheError::ProtocolError("no body".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CacheError::CapacityExhausted,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CacheError::InvalidOrigin("".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_uncached_delivery_classification() {
        assert!(CacheError::AllocationFailure("shm".into()).allows_uncached_delivery());
        assert!(CacheError::CapacityExhausted.allows_uncached_delivery());
        assert!(CacheError::TooLarge { size: 2, limit: 1 }.allows_uncached_delivery());
        assert!(!CacheError::NotFound("/x".into()).allows_uncached_delivery());
        assert!(!CacheError::OriginUnreachable("h".into()).allows_uncached_delivery());
    }

    #[test]
    fn test_too_large_message() {
        let err = CacheError::TooLarge {
            size: 5000,
            limit: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Content too large: 5000 bytes exceeds limit of 4096 bytes"
        );
    }
}
