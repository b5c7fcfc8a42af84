//! Cache Entry Module
//!
//! Entry metadata as seen from outside the table, the owning token for a
//! content block, and the caller-side view of cached bytes.

use std::fmt;
use std::ops::Deref;

use memmap2::Mmap;

use crate::cache::CacheKey;

// == Cache Entry ==
/// Snapshot of one occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// Slot index inside the table
    pub slot: usize,
    /// Cache key the entry was stored under
    pub key: CacheKey,
    /// Content length in bytes
    pub size: u64,
    /// Generation of the content block backing this entry
    pub generation: u64,
    /// Logical clock value of the last insert or hit
    pub last_access: u64,
    /// Number of inserts and hits recorded for this entry
    pub access_count: u64,
}

// == Block Id ==
/// Owning token for one content block.
///
/// Not `Clone` or `Copy`: a token is produced once when a block is committed
/// to a slot or vacated from it, and consumed by exactly one of
/// `CacheTable::occupy` or `SharedSegment::release_content_block`.
#[derive(PartialEq, Eq)]
pub struct BlockId(u64);

impl BlockId {
    pub(crate) fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// Generation number naming the block.
    pub fn generation(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({:016x})", self.0)
    }
}

// == Content ==
/// Cached bytes mapped read-only into the calling process.
///
/// The mapping is private to this value. If the entry is evicted while the
/// value is alive, the bytes stay readable until it is dropped and can never
/// be replaced by another block's contents.
pub struct Content {
    generation: u64,
    map: Mmap,
}

impl Content {
    pub(crate) fn new(generation: u64, map: Mmap) -> Self {
        Self { generation, map }
    }

    /// Content length in bytes.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Generation of the block the bytes were mapped from.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for Content {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map
    }
}

impl AsRef<[u8]> for Content {
    fn as_ref(&self) -> &[u8] {
        &self.map
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("generation", &self.generation)
            .field("size", &self.size())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_generation() {
        let id = BlockId::new(42);
        assert_eq!(id.generation(), 42);
        assert_eq!(format!("{:?}", id), "BlockId(000000000000002a)");
    }

    #[test]
    fn test_content_exposes_mapped_bytes() {
        let mut file = tempfile::tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"cached bytes").unwrap();
        let map = unsafe { Mmap::map(&file).unwrap() };

        let content = Content::new(7, map);
        assert_eq!(content.size(), 12);
        assert_eq!(content.generation(), 7);
        assert_eq!(&content[..], b"cached bytes");
        let bytes: &[u8] = content.as_ref();
        assert_eq!(bytes, b"cached bytes");
    }
}
