//! Bounded timestamp queue between the watcher thread and consumer dispatch.
//!
//! Fixed-capacity ring of 32-bit microsecond timestamps behind one mutex.
//! The lock is held only for O(1) index arithmetic, never across I/O.
//!
//! # Overflow
//!
//! A push onto a full queue evicts the oldest entry. The first eviction of an
//! overflow episode logs a warning; further evictions stay silent until a
//! push observes the queue non-full again.

use hub_common::IrqStats;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug)]
struct Ring {
    buf: Box<[u32]>,
    head: usize,
    tail: usize,
    count: usize,
    overflow_warned: bool,
    overflow_warnings: u64,
}

/// Single-producer, single-consumer FIFO of edge timestamps with drop-oldest overflow.
#[derive(Debug)]
pub struct TimestampQueue {
    ring: Mutex<Ring>,
    stats: Option<Arc<IrqStats>>,
}

impl TimestampQueue {
    /// Create a queue holding at most `capacity` timestamps (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                buf: vec![0u32; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
                overflow_warned: false,
                overflow_warnings: 0,
            }),
            stats: None,
        }
    }

    /// Create a queue that reports evictions to `stats`.
    #[must_use]
    pub fn with_stats(capacity: usize, stats: Arc<IrqStats>) -> Self {
        Self {
            stats: Some(stats),
            ..Self::new(capacity)
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a timestamp, evicting the oldest one if the queue is full.
    pub fn push(&self, timestamp_us: u32) {
        let mut ring = self.lock();
        let capacity = ring.buf.len();

        if ring.count == capacity {
            if !ring.overflow_warned {
                ring.overflow_warned = true;
                ring.overflow_warnings += 1;
                warn!(capacity, "Interrupt timestamp queue overflow, dropping oldest");
            }
            ring.tail = (ring.tail + 1) % capacity;
            ring.count -= 1;
            if let Some(stats) = &self.stats {
                stats.record_overflow_drop();
            }
        } else {
            ring.overflow_warned = false;
        }

        let head = ring.head;
        ring.buf[head] = timestamp_us;
        ring.head = (head + 1) % capacity;
        ring.count += 1;
    }

    /// Remove the oldest timestamp, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<u32> {
        let mut ring = self.lock();
        if ring.count == 0 {
            return None;
        }
        let value = ring.buf[ring.tail];
        ring.tail = (ring.tail + 1) % ring.buf.len();
        ring.count -= 1;
        Some(value)
    }

    /// Number of queued timestamps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().count
    }

    /// Whether the queue holds no timestamps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued timestamps.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().buf.len()
    }

    /// Number of overflow warnings emitted so far.
    #[must_use]
    pub fn overflow_warnings(&self) -> u64 {
        self.lock().overflow_warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(queue: &TimestampQueue) -> Vec<u32> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let queue = TimestampQueue::new(8);
        for ts in [5, 1, 9] {
            queue.push(ts);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(drain(&queue), vec![5, 1, 9]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_empty_returns_none() {
        let queue = TimestampQueue::new(4);
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_overflow_keeps_newest_and_warns_once() {
        let queue = TimestampQueue::new(4);
        for ts in [10, 20, 30, 40, 50, 60] {
            queue.push(ts);
        }
        assert_eq!(queue.overflow_warnings(), 1);
        assert_eq!(drain(&queue), vec![30, 40, 50, 60]);
    }

    #[test]
    fn test_full_push_evicts_exactly_one() {
        let stats = Arc::new(IrqStats::new());
        let queue = TimestampQueue::with_stats(3, Arc::clone(&stats));
        for ts in 1..=3 {
            queue.push(ts);
        }
        queue.push(4);
        assert_eq!(queue.len(), 3);
        assert_eq!(stats.snapshot().overflow_drops, 1);
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_overflow_warning_rearms_after_non_full() {
        let queue = TimestampQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3); // overflow episode 1
        queue.push(4);
        assert_eq!(queue.overflow_warnings(), 1);

        queue.pop();
        queue.push(5); // observed non-full, re-arms
        queue.push(6); // overflow episode 2
        assert_eq!(queue.overflow_warnings(), 2);
        assert_eq!(drain(&queue), vec![5, 6]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = TimestampQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(1);
        queue.push(2);
        assert_eq!(drain(&queue), vec![2]);
    }

    proptest! {
        #[test]
        fn prop_holds_newest_min_n_capacity(
            capacity in 1usize..32,
            timestamps in proptest::collection::vec(any::<u32>(), 0..128),
        ) {
            let queue = TimestampQueue::new(capacity);
            for &ts in &timestamps {
                queue.push(ts);
            }

            let kept = timestamps.len().min(capacity);
            let evicted = timestamps.len() - kept;
            prop_assert_eq!(queue.len(), kept);
            prop_assert_eq!(drain(&queue), timestamps[evicted..].to_vec());
            prop_assert_eq!(queue.overflow_warnings(), u64::from(evicted > 0));
        }

        #[test]
        fn prop_interleaved_ops_match_model(
            capacity in 1usize..16,
            ops in proptest::collection::vec(proptest::option::of(any::<u32>()), 0..200),
        ) {
            let queue = TimestampQueue::new(capacity);
            let mut model = std::collections::VecDeque::new();
            for op in ops {
                match op {
                    Some(ts) => {
                        if model.len() == capacity {
                            model.pop_front();
                        }
                        model.push_back(ts);
                        queue.push(ts);
                    }
                    None => prop_assert_eq!(queue.pop(), model.pop_front()),
                }
            }
            prop_assert_eq!(drain(&queue), model.into_iter().collect::<Vec<_>>());
        }
    }
}
