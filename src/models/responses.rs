//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing JSON bodies.

use serde::Serialize;

use crate::cache::{CacheEntry, CacheStats};

/// Response body for the stats endpoint (GET /_cache/stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of evictions
    pub evictions: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Bytes currently cached
    pub current_size: u64,
    /// Configured size limit in bytes
    pub size_limit: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Fraction of the size limit in use (current_size / size_limit)
    pub fill_ratio: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            fill_ratio: stats.fill_ratio(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            total_entries: stats.total_entries,
            current_size: stats.current_size,
            size_limit: stats.size_limit,
        }
    }
}

/// One occupied slot in the entries listing (GET /_cache/entries)
#[derive(Debug, Clone, Serialize)]
pub struct EntryResponse {
    pub slot: usize,
    /// Cache key as 16 hex digits
    pub key: String,
    pub size: u64,
    pub generation: u64,
    pub last_access: u64,
    pub access_count: u64,
}

impl From<CacheEntry> for EntryResponse {
    fn from(entry: CacheEntry) -> Self {
        Self {
            slot: entry.slot,
            key: format!("{:016x}", entry.key),
            size: entry.size,
            generation: entry.generation,
            last_access: entry.last_access,
            access_count: entry.access_count,
        }
    }
}

/// Response body for the health endpoint (GET /_cache/health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Shared segment the server is attached to
    pub segment: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(segment: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            segment: segment.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_response_from_stats() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            evictions: 5,
            total_entries: 3,
            current_size: 1024,
            size_limit: 4096,
        };
        let resp = StatsResponse::from(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.fill_ratio, 0.25);
        assert_eq!(resp.current_size, 1024);
        assert_eq!(resp.size_limit, 4096);
    }

    #[test]
    fn test_stats_response_zero_requests() {
        let resp = StatsResponse::from(CacheStats::default());
        assert_eq!(resp.hit_rate, 0.0);
        assert_eq!(resp.fill_ratio, 0.0);
    }

    #[test]
    fn test_entry_response_formats_key() {
        let entry = CacheEntry {
            slot: 2,
            key: 0xabc,
            size: 10,
            generation: 7,
            last_access: 3,
            access_count: 1,
        };
        let json = serde_json::to_value(EntryResponse::from(entry)).unwrap();
        assert_eq!(json["key"], "0000000000000abc");
        assert_eq!(json["slot"], 2);
        assert_eq!(json["generation"], 7);
    }

    #[test]
    fn test_health_response() {
        let resp = HealthResponse::healthy("shm_webcache");
        assert_eq!(resp.status, "healthy");
        assert_eq!(resp.segment, "shm_webcache");
        assert!(chrono::DateTime::parse_from_rfc3339(&resp.timestamp).is_ok());
    }
}
