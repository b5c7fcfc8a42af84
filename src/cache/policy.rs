//! Eviction Policy Module
//!
//! Decides in which order occupied slots are given up when an insertion
//! needs room.

use std::fmt;
use std::str::FromStr;

use crate::cache::table::SlotRecord;
use crate::error::CacheError;

// == Eviction Policy ==
/// Strategy used to pick eviction victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Ascending slot index, regardless of access pattern
    #[default]
    SlotOrder,
    /// Oldest last access first
    LeastRecentlyUsed,
    /// Fewest accesses first, oldest last access breaking ties
    LeastFrequentlyUsed,
}

impl EvictionPolicy {
    // == Victim Order ==
    /// Returns the indices of occupied slots in the order they should be
    /// evicted. Each occupied slot appears exactly once.
    pub(crate) fn victim_order(&self, slots: &[SlotRecord]) -> Vec<usize> {
        let mut occupied: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_occupied())
            .map(|(index, _)| index)
            .collect();

        match self {
            EvictionPolicy::SlotOrder => {}
            EvictionPolicy::LeastRecentlyUsed => {
                occupied.sort_by_key(|&i| (slots[i].last_access, i));
            }
            EvictionPolicy::LeastFrequentlyUsed => {
                occupied.sort_by_key(|&i| (slots[i].access_count, slots[i].last_access, i));
            }
        }

        occupied
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::SlotOrder => "slot-order",
            EvictionPolicy::LeastRecentlyUsed => "lru",
            EvictionPolicy::LeastFrequentlyUsed => "lfu",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slot-order" | "slot_order" | "index" => Ok(EvictionPolicy::SlotOrder),
            "lru" => Ok(EvictionPolicy::LeastRecentlyUsed),
            "lfu" => Ok(EvictionPolicy::LeastFrequentlyUsed),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown eviction policy '{}'",
                other
            ))),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn slot(last_access: u64, access_count: u64) -> SlotRecord {
        SlotRecord {
            key: last_access,
            size: 1,
            generation: last_access + 1,
            last_access,
            access_count,
            state: SlotRecord::OCCUPIED,
        }
    }

    fn empty() -> SlotRecord {
        SlotRecord::default()
    }

    #[test]
    fn test_slot_order_skips_empty_slots() {
        let slots = vec![slot(5, 1), empty(), slot(1, 1), slot(3, 1)];
        let order = EvictionPolicy::SlotOrder.victim_order(&slots);
        assert_eq!(order, vec![0, 2, 3]);
    }

    #[test]
    fn test_lru_orders_by_last_access() {
        let slots = vec![slot(5, 1), slot(1, 9), empty(), slot(3, 2)];
        let order = EvictionPolicy::LeastRecentlyUsed.victim_order(&slots);
        assert_eq!(order, vec![1, 3, 0]);
    }

    #[test]
    fn test_lfu_orders_by_count_then_recency() {
        let slots = vec![slot(5, 1), slot(1, 9), slot(3, 1), slot(2, 4)];
        let order = EvictionPolicy::LeastFrequentlyUsed.victim_order(&slots);
        assert_eq!(order, vec![2, 0, 3, 1]);
    }

    #[test]
    fn test_empty_table_has_no_victims() {
        let slots = vec![empty(); 4];
        assert!(EvictionPolicy::LeastRecentlyUsed
            .victim_order(&slots)
            .is_empty());
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(
            "slot-order".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::SlotOrder
        );
        assert_eq!(
            "LRU".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::LeastRecentlyUsed
        );
        assert_eq!(
            "lfu".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::LeastFrequentlyUsed
        );
        assert!(matches!(
            "random".parse::<EvictionPolicy>(),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for policy in [
            EvictionPolicy::SlotOrder,
            EvictionPolicy::LeastRecentlyUsed,
            EvictionPolicy::LeastFrequentlyUsed,
        ] {
            assert_eq!(policy.to_string().parse::<EvictionPolicy>().unwrap(), policy);
        }
    }
}
