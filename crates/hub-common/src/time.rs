//! Clock source and current-burst timestamp.
//!
//! Timestamps are CLOCK_MONOTONIC microseconds truncated to 32 bits, so they
//! wrap roughly every 71.6 minutes. Consumers compare them with wrapping
//! arithmetic only.

use nix::time::{clock_gettime, ClockId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic time in microseconds, wrapped to 32 bits.
///
/// Returns 0 if the monotonic clock cannot be read.
#[must_use]
pub fn monotonic_now_us32() -> u32 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => {
            let us = (ts.tv_sec() as u64)
                .wrapping_mul(1_000_000)
                .wrapping_add(ts.tv_nsec() as u64 / 1_000);
            us as u32
        }
        Err(_) => 0,
    }
}

/// Convert a kernel nanosecond timestamp to the wrapping microsecond base.
#[inline]
#[must_use]
pub fn ns_to_us32(ns: u64) -> u32 {
    (ns / 1_000) as u32
}

/// Source of wrapping 32-bit microsecond timestamps.
pub trait ClockSource: Send + Sync {
    /// Current time in microseconds.
    fn now_us(&self) -> u32;
}

/// CLOCK_MONOTONIC backed clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl ClockSource for MonotonicClock {
    fn now_us(&self) -> u32 {
        monotonic_now_us32()
    }
}

const ACTIVE_BIT: u64 = 1 << 32;

/// Timestamp of the interrupt currently being serviced.
///
/// The (timestamp, active) pair is packed into one atomic word so readers
/// never observe a timestamp from one burst paired with the flag of another.
/// Written only by consumer dispatch; read by the transport to tag frames
/// with trigger time instead of read time.
#[derive(Debug, Default)]
pub struct CurrentBurst {
    word: AtomicU64,
}

impl CurrentBurst {
    /// Create an inactive burst.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a burst triggered at `timestamp_us` as active.
    pub fn begin(&self, timestamp_us: u32) {
        self.word
            .store(ACTIVE_BIT | u64::from(timestamp_us), Ordering::Release);
    }

    /// Mark the current burst as finished, keeping its timestamp.
    pub fn end(&self) {
        self.word.fetch_and(!ACTIVE_BIT, Ordering::AcqRel);
    }

    /// Timestamp of the active burst, if any.
    #[must_use]
    pub fn get(&self) -> Option<u32> {
        let word = self.word.load(Ordering::Acquire);
        (word & ACTIVE_BIT != 0).then_some(word as u32)
    }

    /// Whether a burst is being serviced right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.get().is_some()
    }

    /// Burst timestamp when active, otherwise the clock's current time.
    #[must_use]
    pub fn timestamp_or(&self, clock: &dyn ClockSource) -> u32 {
        self.get().unwrap_or_else(|| clock.now_us())
    }
}
