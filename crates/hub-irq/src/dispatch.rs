//! Consumer dispatch on the loop-owning thread.
//!
//! [`Dispatcher::on_wake`] turns queued edge timestamps into bursts of
//! service callback invocations. For each timestamp it publishes the burst
//! as current, then calls the service callback for as long as the line stays
//! asserted, up to the drain cap.
//!
//! A `Dispatcher` owns a `Box<dyn FnMut()>` and is therefore `!Send`: it
//! stays on the thread that called [`InterruptBridge::start`](crate::InterruptBridge::start),
//! and service callbacks can only ever run there.

use crate::line::InterruptLine;
use crate::watcher::IrqShared;
use hub_common::stats::IrqStats;
use hub_common::time::CurrentBurst;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// What one [`Dispatcher::on_wake`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeOutcome {
    /// True if nothing was pending and the wake was ignored.
    pub duplicate: bool,
    /// Timestamps popped and serviced.
    pub bursts: u32,
    /// Service callback invocations across all bursts.
    pub service_calls: u64,
}

/// Ends the burst even if the service callback unwinds.
struct BurstGuard<'a>(&'a CurrentBurst);

impl<'a> BurstGuard<'a> {
    fn begin(burst: &'a CurrentBurst, timestamp_us: u32) -> Self {
        burst.begin(timestamp_us);
        Self(burst)
    }
}

impl Drop for BurstGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Drains queued interrupts into service callback bursts.
pub struct Dispatcher {
    shared: Arc<IrqShared>,
    line: Weak<dyn InterruptLine>,
    burst: Arc<CurrentBurst>,
    drain_cap: u32,
    service: Box<dyn FnMut()>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.shared.queued())
            .field("pending", &self.shared.is_pending())
            .field("drain_cap", &self.drain_cap)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<IrqShared>,
        line: Weak<dyn InterruptLine>,
        burst: Arc<CurrentBurst>,
        drain_cap: u32,
        service: Box<dyn FnMut()>,
    ) -> Self {
        Self {
            shared,
            line,
            burst,
            drain_cap: drain_cap.max(1),
            service,
        }
    }

    /// Service everything queued since the last wake.
    ///
    /// Returns immediately when no wake is pending. Otherwise clears the
    /// pending flag, drains the queue, and checks the flag once more so an
    /// edge queued during the drain is handled now rather than stranded.
    pub fn on_wake(&mut self) -> WakeOutcome {
        if !self.shared.pending.take() {
            self.shared.stats.record_duplicate_wake();
            trace!("Duplicate wake ignored");
            return WakeOutcome {
                duplicate: true,
                ..WakeOutcome::default()
            };
        }

        let mut outcome = WakeOutcome::default();
        loop {
            while let Some(timestamp_us) = self.shared.queue.pop() {
                outcome.bursts += 1;
                outcome.service_calls += u64::from(self.service_burst(timestamp_us));
            }
            if !self.shared.pending.take() {
                break;
            }
        }
        outcome
    }

    fn service_burst(&mut self, timestamp_us: u32) -> u32 {
        let stats = Arc::clone(&self.shared.stats);
        let _burst = BurstGuard::begin(&self.burst, timestamp_us);

        let mut calls = 0;
        while calls < self.drain_cap && line_asserted(&self.line, &stats) {
            (self.service)();
            calls += 1;
        }

        if calls == self.drain_cap && line_asserted(&self.line, &stats) {
            warn!(
                drain_cap = self.drain_cap,
                timestamp_us, "Drain cap reached with interrupt still asserted, abandoning burst"
            );
            stats.record_drain_cap_hit();
        }

        stats.record_burst();
        stats.record_service_calls(u64::from(calls));
        calls
    }

    /// Timestamp of the burst being serviced, if any.
    #[must_use]
    pub fn current_burst(&self) -> Option<u32> {
        self.burst.get()
    }

    /// Timestamps waiting for the next wake.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queued()
    }

    /// Whether a wake is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }
}

/// Read the level; failures and a released line count as deasserted.
fn line_asserted(line: &Weak<dyn InterruptLine>, stats: &IrqStats) -> bool {
    let Some(line) = line.upgrade() else {
        return false;
    };
    match line.is_asserted() {
        Ok(asserted) => asserted,
        Err(e) => {
            warn!(error = %e, "Interrupt level read failed, treating line as deasserted");
            stats.record_level_fault();
            false
        }
    }
}
