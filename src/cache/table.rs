//! Cache Table Module
//!
//! Fixed-capacity slot array that lives inside the shared region, together
//! with the header holding the size counters and statistics.
//!
//! # Layout
//!
//! ```text
//! +-------------+-----------+-----------+-----+-------------+
//! | TableHeader |  slot 0   |  slot 1   | ... |  slot 499   |
//! +-------------+-----------+-----------+-----+-------------+
//! ```
//!
//! Every field is a `u64`, so the region is viewed as a `&mut [u64]` and the
//! layout is identical in every process attached to it. A `CacheTable` is
//! only ever constructed inside a critical section.

use std::mem::size_of;
use std::slice;

use crate::cache::{
    BlockId, CacheEntry, CacheKey, CacheStats, EvictionPolicy, CACHE_ENTRY_MAX,
};
use crate::error::{CacheError, Result};

/// Marks a formatted region ("SHMWCACH").
pub(crate) const TABLE_MAGIC: u64 = u64::from_le_bytes(*b"SHMWCACH");

// == Header ==
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct TableHeader {
    pub magic: u64,
    pub size_limit: u64,
    pub current_size: u64,
    /// Generation handed to the next content block; 0 is never used
    pub next_generation: u64,
    /// Logical clock advanced on every insert and hit
    pub clock: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub capacity: u64,
}

// == Slot ==
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SlotRecord {
    pub key: u64,
    pub size: u64,
    pub generation: u64,
    pub last_access: u64,
    pub access_count: u64,
    pub state: u64,
}

impl SlotRecord {
    pub const EMPTY: u64 = 0;
    pub const OCCUPIED: u64 = 1;

    pub fn is_occupied(&self) -> bool {
        self.state == Self::OCCUPIED
    }
}

const WORD: usize = size_of::<u64>();
const HEADER_WORDS: usize = size_of::<TableHeader>() / WORD;
const SLOT_WORDS: usize = size_of::<SlotRecord>() / WORD;

/// Number of `u64` words in the shared region.
pub const TABLE_WORDS: usize = HEADER_WORDS + CACHE_ENTRY_MAX * SLOT_WORDS;

/// Size of the shared region in bytes.
pub const TABLE_BYTES: usize = TABLE_WORDS * WORD;

// == Cache Table ==
/// Exclusive view over the shared header and slots.
pub struct CacheTable<'a> {
    header: &'a mut TableHeader,
    slots: &'a mut [SlotRecord],
}

impl<'a> CacheTable<'a> {
    /// Views a region of at least `TABLE_WORDS` words as a table.
    pub(crate) fn from_words(words: &'a mut [u64]) -> Option<Self> {
        if words.len() < TABLE_WORDS {
            return None;
        }
        let (head, rest) = words.split_at_mut(HEADER_WORDS);

        // SAFETY: TableHeader and SlotRecord are repr(C) and consist only of
        // u64 fields, so they share u64 alignment and accept any bit pattern.
        // `head` and `rest` do not overlap and `rest` holds at least
        // CACHE_ENTRY_MAX * SLOT_WORDS words.
        let header = unsafe { &mut *head.as_mut_ptr().cast::<TableHeader>() };
        let slots = unsafe {
            slice::from_raw_parts_mut(rest.as_mut_ptr().cast::<SlotRecord>(), CACHE_ENTRY_MAX)
        };

        Some(Self { header, slots })
    }

    // == Format ==
    /// Zeroes every slot and writes a fresh header.
    pub(crate) fn format(&mut self, size_limit: u64) {
        self.slots.fill(SlotRecord::default());
        *self.header = TableHeader {
            magic: TABLE_MAGIC,
            size_limit,
            current_size: 0,
            next_generation: 1,
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            capacity: CACHE_ENTRY_MAX as u64,
        };
    }

    pub(crate) fn is_formatted(&self) -> bool {
        self.header.magic == TABLE_MAGIC && self.header.capacity == CACHE_ENTRY_MAX as u64
    }

    pub fn size_limit(&self) -> u64 {
        self.header.size_limit
    }

    pub fn current_size(&self) -> u64 {
        self.header.current_size
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Find ==
    /// Linear scan in slot order; the first occupied slot with `key` wins.
    pub fn find(&self, key: CacheKey) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.is_occupied() && s.key == key)
    }

    /// Records an access to an occupied slot.
    pub fn touch(&mut self, index: usize) {
        self.header.clock += 1;
        let clock = self.header.clock;
        if let Some(slot) = self.slots.get_mut(index).filter(|s| s.is_occupied()) {
            slot.last_access = clock;
            slot.access_count += 1;
        }
    }

    pub fn entry(&self, index: usize) -> Option<CacheEntry> {
        let slot = self.slots.get(index).filter(|s| s.is_occupied())?;
        Some(CacheEntry {
            slot: index,
            key: slot.key,
            size: slot.size,
            generation: slot.generation,
            last_access: slot.last_access,
            access_count: slot.access_count,
        })
    }

    /// Snapshot of every occupied slot in slot order.
    pub fn entries(&self) -> Vec<CacheEntry> {
        (0..self.slots.len()).filter_map(|i| self.entry(i)).collect()
    }

    /// Hands out the generation for the next content block.
    pub fn next_generation(&mut self) -> u64 {
        let generation = self.header.next_generation.max(1);
        self.header.next_generation = generation + 1;
        generation
    }

    pub fn record_hit(&mut self) {
        self.header.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.header.misses += 1;
    }

    // == Reserve ==
    /// Makes room for `new_size` bytes and returns the slot to write into.
    ///
    /// Victims are taken in `policy` order and handed to `release` one at a
    /// time, after their slot is already vacated. Each occupied slot is
    /// visited at most once. On `TooLarge` the table is untouched; on
    /// `CapacityExhausted` the evictions already performed stand.
    pub fn reserve(
        &mut self,
        new_size: u64,
        policy: EvictionPolicy,
        mut release: impl FnMut(BlockId),
    ) -> Result<usize> {
        let limit = self.header.size_limit;
        if new_size > limit {
            return Err(CacheError::TooLarge {
                size: new_size,
                limit,
            });
        }

        if self.header.current_size.saturating_add(new_size) > limit {
            for index in policy.victim_order(self.slots) {
                if self.header.current_size.saturating_add(new_size) <= limit {
                    break;
                }
                if let Some(block) = self.vacate(index) {
                    self.header.evictions += 1;
                    release(block);
                }
            }

            if self.header.current_size.saturating_add(new_size) > limit {
                return Err(CacheError::CapacityExhausted);
            }
        }

        self.slots
            .iter()
            .position(|s| !s.is_occupied())
            .ok_or(CacheError::CapacityExhausted)
    }

    // == Occupy ==
    /// Stores an entry in a free slot obtained from `reserve`.
    ///
    /// Returns the block token back if the slot is out of range or occupied.
    pub fn occupy(
        &mut self,
        index: usize,
        key: CacheKey,
        size: u64,
        block: BlockId,
    ) -> std::result::Result<(), BlockId> {
        self.header.clock += 1;
        let clock = self.header.clock;
        let Some(slot) = self.slots.get_mut(index).filter(|s| !s.is_occupied()) else {
            return Err(block);
        };

        *slot = SlotRecord {
            key,
            size,
            generation: block.generation(),
            last_access: clock,
            access_count: 1,
            state: SlotRecord::OCCUPIED,
        };
        self.header.current_size += size;
        Ok(())
    }

    // == Vacate ==
    /// Clears an occupied slot, subtracts its size and returns its block.
    pub fn vacate(&mut self, index: usize) -> Option<BlockId> {
        let slot = self.slots.get_mut(index).filter(|s| s.is_occupied())?;
        let block = BlockId::new(slot.generation);
        let size = slot.size;
        *slot = SlotRecord::default();
        self.header.current_size = self.header.current_size.saturating_sub(size);
        Some(block)
    }

    /// Vacates every occupied slot, handing each block to `release`.
    pub fn drain(&mut self, mut release: impl FnMut(BlockId)) -> usize {
        let mut count = 0;
        for index in 0..self.slots.len() {
            if let Some(block) = self.vacate(index) {
                release(block);
                count += 1;
            }
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.header.hits,
            misses: self.header.misses,
            evictions: self.header.evictions,
            total_entries: self.len(),
            current_size: self.header.current_size,
            size_limit: self.header.size_limit,
        }
    }

    /// Describes the first broken table invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        let occupied_total: u64 = self
            .slots
            .iter()
            .filter(|s| s.is_occupied())
            .map(|s| s.size)
            .sum();
        if occupied_total != self.header.current_size {
            return Some(format!(
                "current_size {} does not match occupied total {}",
                self.header.current_size, occupied_total
            ));
        }
        if self.header.current_size > self.header.size_limit {
            return Some(format!(
                "current_size {} exceeds size_limit {}",
                self.header.current_size, self.header.size_limit
            ));
        }

        let mut keys: Vec<u64> = self
            .slots
            .iter()
            .filter(|s| s.is_occupied())
            .map(|s| s.key)
            .collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        if keys.len() != total {
            return Some("duplicate key among occupied slots".to_string());
        }

        None
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Vec<u64> {
        vec![0; TABLE_WORDS]
    }

    fn insert(
        table: &mut CacheTable<'_>,
        key: u64,
        size: u64,
        evicted: &mut Vec<u64>,
    ) -> Result<usize> {
        let index = table.reserve(size, EvictionPolicy::SlotOrder, |b| {
            evicted.push(b.generation())
        })?;
        let generation = table.next_generation();
        table
            .occupy(index, key, size, BlockId::new(generation))
            .expect("reserved slot must be free");
        Ok(index)
    }

    #[test]
    fn test_region_too_small() {
        let mut words = vec![0u64; TABLE_WORDS - 1];
        assert!(CacheTable::from_words(&mut words).is_none());
    }

    #[test]
    fn test_format_resets_table() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        assert!(!table.is_formatted());

        table.format(4096);
        assert!(table.is_formatted());
        assert_eq!(table.size_limit(), 4096);
        assert_eq!(table.current_size(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_miss_on_empty_table() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        assert_eq!(table.find(12345), None);
    }

    #[test]
    fn test_insert_then_find() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        let mut evicted = Vec::new();

        let index = insert(&mut table, 99, 100, &mut evicted).unwrap();
        assert_eq!(table.find(99), Some(index));
        assert_eq!(table.current_size(), 100);
        let entry = table.entry(index).unwrap();
        assert_eq!(entry.size, 100);
        assert_eq!(entry.generation, 1);
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_three_entries_of_2000_bytes() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        let mut evicted = Vec::new();

        assert_eq!(insert(&mut table, 1, 2000, &mut evicted).unwrap(), 0);
        assert_eq!(insert(&mut table, 2, 2000, &mut evicted).unwrap(), 1);
        assert_eq!(table.current_size(), 4000);

        // Third insertion evicts slot 0 and reuses it
        assert_eq!(insert(&mut table, 3, 2000, &mut evicted).unwrap(), 0);
        assert_eq!(evicted, vec![1]);
        assert_eq!(table.current_size(), 4000);
        assert_eq!(table.find(1), None);
        assert_eq!(table.find(2), Some(1));
        assert_eq!(table.find(3), Some(0));
        assert_eq!(table.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_frees_lowest_slots_first() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(5000);
        let mut evicted = Vec::new();

        for key in 0..5 {
            insert(&mut table, key, 1000, &mut evicted).unwrap();
        }
        // Needs 2500 bytes: slots 0, 1 and 2 must go, in that order
        insert(&mut table, 100, 2500, &mut evicted).unwrap();

        assert_eq!(evicted, vec![1, 2, 3]);
        assert_eq!(table.find(3), Some(3));
        assert_eq!(table.find(4), Some(4));
        assert_eq!(table.current_size(), 4500);
        assert!(table.invariant_violation().is_none());
    }

    #[test]
    fn test_oversized_leaves_table_unchanged() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        let mut evicted = Vec::new();
        insert(&mut table, 1, 1000, &mut evicted).unwrap();

        let result = insert(&mut table, 2, 4097, &mut evicted);
        assert!(matches!(
            result,
            Err(CacheError::TooLarge {
                size: 4097,
                limit: 4096
            })
        ));
        assert_eq!(table.current_size(), 1000);
        assert_eq!(table.find(1), Some(0));
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_slot_count_exhausted() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(2_097_152);
        let mut evicted = Vec::new();

        for key in 0..CACHE_ENTRY_MAX as u64 {
            insert(&mut table, key, 1, &mut evicted).unwrap();
        }
        let result = insert(&mut table, 9999, 1, &mut evicted);
        assert!(matches!(result, Err(CacheError::CapacityExhausted)));
        assert_eq!(table.len(), CACHE_ENTRY_MAX);
    }

    #[test]
    fn test_lru_policy_spares_recently_touched() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(3000);

        for key in 0..3u64 {
            let index = table
                .reserve(1000, EvictionPolicy::LeastRecentlyUsed, |_| {})
                .unwrap();
            let generation = table.next_generation();
            table
                .occupy(index, key, 1000, BlockId::new(generation))
                .unwrap();
        }
        table.touch(0);

        let mut evicted = Vec::new();
        let index = table
            .reserve(1000, EvictionPolicy::LeastRecentlyUsed, |b| {
                evicted.push(b.generation())
            })
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(evicted, vec![2]);
    }

    #[test]
    fn test_occupy_rejects_taken_slot() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        table.occupy(0, 1, 10, BlockId::new(1)).unwrap();

        let rejected = table.occupy(0, 2, 10, BlockId::new(2));
        assert_eq!(rejected.unwrap_err().generation(), 2);
        assert_eq!(table.current_size(), 10);
    }

    #[test]
    fn test_vacate_returns_block_once() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        table.occupy(3, 1, 10, BlockId::new(7)).unwrap();

        assert_eq!(table.vacate(3).unwrap().generation(), 7);
        assert!(table.vacate(3).is_none());
        assert_eq!(table.current_size(), 0);
    }

    #[test]
    fn test_drain_releases_everything() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        table.occupy(0, 1, 10, BlockId::new(1)).unwrap();
        table.occupy(9, 2, 20, BlockId::new(2)).unwrap();

        let mut released = Vec::new();
        assert_eq!(table.drain(|b| released.push(b.generation())), 2);
        assert_eq!(released, vec![1, 2]);
        assert!(table.is_empty());
        assert_eq!(table.current_size(), 0);
    }

    #[test]
    fn test_invariant_violation_detects_duplicates() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);
        table.occupy(0, 5, 10, BlockId::new(1)).unwrap();
        table.occupy(1, 5, 10, BlockId::new(2)).unwrap();

        assert!(table.invariant_violation().is_some());
    }

    #[test]
    fn test_generations_are_unique() {
        let mut words = region();
        let mut table = CacheTable::from_words(&mut words).unwrap();
        table.format(4096);

        let a = table.next_generation();
        let b = table.next_generation();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }
}
