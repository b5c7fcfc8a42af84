//! Key Hasher Module
//!
//! djb2 string hash used to derive cache keys from a resource path and query.
//! Not cryptographic: distinct resources can collide and will then alias the
//! same slot. Callers accept that aliasing.

/// A cache key: `hash(normalized path) + hash(query)` with wrapping addition.
pub type CacheKey = u64;

/// Seed of the djb2 recurrence.
const HASH_SEED: u64 = 5381;

// == Hash ==
/// Hashes a byte sequence with `h = h * 33 + byte`, starting at 5381.
///
/// Arithmetic wraps at 64 bits. Bytes are taken as unsigned values, so the
/// result is identical on every platform and across processes.
pub fn hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(HASH_SEED, |h, &b| {
        (h << 5).wrapping_add(h).wrapping_add(u64::from(b))
    })
}

// == Normalize Path ==
/// Collapses runs of consecutive `/` into a single separator.
///
/// Works on raw bytes so paths that are not valid UTF-8 keep their identity.
pub fn normalize_path(path: &[u8]) -> Vec<u8> {
    let mut normalized = Vec::with_capacity(path.len());
    for &b in path {
        if b == b'/' && normalized.last() == Some(&b'/') {
            continue;
        }
        normalized.push(b);
    }
    normalized
}

// == Cache Key ==
/// Derives the cache key for a request.
///
/// An empty query contributes `hash("")`, which is the seed itself.
pub fn cache_key(path: impl AsRef<[u8]>, query: &str) -> CacheKey {
    hash(&normalize_path(path.as_ref())).wrapping_add(hash(query.as_bytes()))
}
