//! Cache Statistics Module
//!
//! Snapshot of the counters kept in the shared table header. Because the
//! counters live in shared memory, a snapshot reflects every worker's
//! activity, not only the calling process.

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time view of cache performance and occupancy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of lookups answered from the table
    pub hits: u64,
    /// Number of lookups that had to populate
    pub misses: u64,
    /// Number of entries evicted to make room
    pub evictions: u64,
    /// Current number of occupied slots
    pub total_entries: usize,
    /// Sum of the sizes of occupied slots in bytes
    pub current_size: u64,
    /// Configured size limit in bytes
    pub size_limit: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the size limit currently in use.
    pub fn fill_ratio(&self) -> f64 {
        if self.size_limit == 0 {
            0.0
        } else {
            self.current_size as f64 / self.size_limit as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_fill_ratio() {
        let stats = CacheStats {
            current_size: 2048,
            size_limit: 4096,
            ..CacheStats::default()
        };
        assert_eq!(stats.fill_ratio(), 0.5);
        assert_eq!(CacheStats::default().fill_ratio(), 0.0);
    }
}
