//! Cache Module
//!
//! Cross-process content cache backed by named shared memory, with a
//! fixed-capacity slot table, pluggable eviction and population from local
//! files or a remote origin.

mod entry;
mod hasher;
mod lock;
mod manager;
mod policy;
mod segment;
mod stats;
mod table;


// Re-export public types
pub use entry::{BlockId, CacheEntry, Content};
pub use hasher::{cache_key, hash, normalize_path, CacheKey};
pub use manager::{CacheManager, FetchMode, ResourceRequest};
pub use policy::EvictionPolicy;
pub use segment::{ContentBlock, CriticalSection, SegmentConfig, SharedSegment};
pub use stats::CacheStats;
pub use table::{CacheTable, TABLE_BYTES};

// == Public Constants ==
/// Number of slots in the shared table
pub const CACHE_ENTRY_MAX: usize = 500;

/// Smallest accepted size limit in bytes
pub const SIZE_LIMIT_MIN: u64 = 4096;

/// Largest accepted size limit in bytes
pub const SIZE_LIMIT_MAX: u64 = 2_097_152;
