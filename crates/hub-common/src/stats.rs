//! Interrupt path counters.
//!
//! Shared between the watcher thread (producer side) and consumer dispatch.
//! Every counter is a relaxed atomic; a snapshot is a best-effort view, not
//! a consistent cut across fields.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the interrupt-to-loop path.
#[derive(Debug, Default)]
pub struct IrqStats {
    edges: AtomicU64,
    synthesized: AtomicU64,
    drain_passes: AtomicU64,
    wakes_sent: AtomicU64,
    wakes_coalesced: AtomicU64,
    duplicate_wakes: AtomicU64,
    bursts: AtomicU64,
    service_calls: AtomicU64,
    drain_cap_hits: AtomicU64,
    level_faults: AtomicU64,
    overflow_drops: AtomicU64,
}

/// Point-in-time copy of [`IrqStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IrqStatsSnapshot {
    /// Falling edges read from the line.
    pub edges: u64,
    /// Timestamps synthesized because the line was asserted at start.
    pub synthesized: u64,
    /// Watcher drain passes after poll readiness.
    pub drain_passes: u64,
    /// Notifications delivered to the loop.
    pub wakes_sent: u64,
    /// Drain passes that found a wake already pending.
    pub wakes_coalesced: u64,
    /// Wakes that found nothing pending.
    pub duplicate_wakes: u64,
    /// Timestamps popped and serviced.
    pub bursts: u64,
    /// Service callback invocations.
    pub service_calls: u64,
    /// Bursts that hit the iteration cap with the line still asserted.
    pub drain_cap_hits: u64,
    /// Level reads that failed during dispatch.
    pub level_faults: u64,
    /// Timestamps evicted by queue overflow.
    pub overflow_drops: u64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        #[doc = concat!("Increment `", stringify!($field), "`.")]
        #[inline]
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl IrqStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_edge, edges);
    counter!(record_synthesized, synthesized);
    counter!(record_drain_pass, drain_passes);
    counter!(record_wake_sent, wakes_sent);
    counter!(record_wake_coalesced, wakes_coalesced);
    counter!(record_duplicate_wake, duplicate_wakes);
    counter!(record_burst, bursts);
    counter!(record_drain_cap_hit, drain_cap_hits);
    counter!(record_level_fault, level_faults);
    counter!(record_overflow_drop, overflow_drops);

    /// Add `calls` service callback invocations.
    #[inline]
    pub fn record_service_calls(&self, calls: u64) {
        self.service_calls.fetch_add(calls, Ordering::Relaxed);
    }

    /// Copy all counters.
    #[must_use]
    pub fn snapshot(&self) -> IrqStatsSnapshot {
        IrqStatsSnapshot {
            edges: self.edges.load(Ordering::Relaxed),
            synthesized: self.synthesized.load(Ordering::Relaxed),
            drain_passes: self.drain_passes.load(Ordering::Relaxed),
            wakes_sent: self.wakes_sent.load(Ordering::Relaxed),
            wakes_coalesced: self.wakes_coalesced.load(Ordering::Relaxed),
            duplicate_wakes: self.duplicate_wakes.load(Ordering::Relaxed),
            bursts: self.bursts.load(Ordering::Relaxed),
            service_calls: self.service_calls.load(Ordering::Relaxed),
            drain_cap_hits: self.drain_cap_hits.load(Ordering::Relaxed),
            level_faults: self.level_faults.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
        }
    }
}
