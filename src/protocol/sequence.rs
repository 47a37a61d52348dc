//! Per-connection sequence id allocation.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

/// Largest sequence id handed out before wrapping back to 1.
pub const DEFAULT_SEQUENCE_LIMIT: u32 = 0x7FFF_FFFF;

/// Atomic counter of sequence ids in `1..=limit`, wrapping on overflow.
///
/// The counter alone cannot know which ids are still awaiting a response,
/// so [`allocate`](Self::allocate) takes an `in_use` predicate. Callers
/// run it under the lock that guards their pending table, which makes
/// "pick an id and register it" a single step.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU32,
    limit: u32,
}

impl SequenceAllocator {
    /// Start from a random id, as a fresh client would.
    pub fn new() -> Self {
        let start = rand::thread_rng().gen_range(0x1000..0x10_0000);
        Self::with_limit(start, DEFAULT_SEQUENCE_LIMIT)
    }

    pub fn starting_at(start: u32) -> Self {
        Self::with_limit(start, DEFAULT_SEQUENCE_LIMIT)
    }

    pub fn with_limit(start: u32, limit: u32) -> Self {
        let limit = limit.max(1);
        Self {
            next: AtomicU32::new(start.clamp(1, limit)),
            limit,
        }
    }

    /// Take the next id, ignoring whether it is in use.
    pub fn next_id(&self) -> u32 {
        let limit = self.limit;
        match self.next.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(if v >= limit { 1 } else { v + 1 })
        }) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Take the next id for which `in_use` is false.
    ///
    /// Returns `None` only when every id in the range is in use.
    pub fn allocate(&self, in_use: impl Fn(u32) -> bool) -> Option<u32> {
        for _ in 0..self.limit {
            let id = self.next_id();
            if !in_use(id) {
                return Some(id);
            }
        }
        None
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_monotonic() {
        let seq = SequenceAllocator::starting_at(10);
        assert_eq!(seq.next_id(), 10);
        assert_eq!(seq.next_id(), 11);
        assert_eq!(seq.next_id(), 12);
    }

    #[test]
    fn test_wraps_to_one() {
        let seq = SequenceAllocator::with_limit(4, 5);
        let ids: Vec<u32> = (0..5).map(|_| seq.next_id()).collect();
        assert_eq!(ids, vec![4, 5, 1, 2, 3]);
    }

    #[test]
    fn test_pending_id_skipped_after_wrap() {
        let seq = SequenceAllocator::with_limit(1, 4);
        let pending: HashSet<u32> = [1, 2].into_iter().collect();
        // 1 and 2 are skipped on the first pass
        assert_eq!(seq.allocate(|id| pending.contains(&id)), Some(3));
        assert_eq!(seq.allocate(|id| pending.contains(&id)), Some(4));
        // wraps past 1 and 2 again
        assert_eq!(seq.allocate(|id| pending.contains(&id)), Some(3));
    }

    #[test]
    fn test_exhausted() {
        let seq = SequenceAllocator::with_limit(1, 3);
        assert_eq!(seq.allocate(|_| true), None);
    }

    #[test]
    fn test_concurrent_allocations_unique() {
        let seq = Arc::new(SequenceAllocator::with_limit(1, 64));
        let pending = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = seq.clone();
                let pending = pending.clone();
                std::thread::spawn(move || {
                    for _ in 0..6 {
                        let mut table = pending.lock().unwrap();
                        let id = seq.allocate(|id| table.contains(&id)).unwrap();
                        assert!(table.insert(id), "id {} handed out twice", id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pending.lock().unwrap().len(), 48);
    }
}
