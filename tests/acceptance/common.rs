//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Building a bridge attached to a simulated line
//! - Waiting on conditions driven by the watcher thread
//! - Running the wake loop until a condition holds

#![allow(dead_code)] // Not every helper is used by every test module

use hub_common::config::InterruptConfig;
use hub_irq::{Dispatcher, InterruptBridge, InterruptLine, SimulatedLine, WaitResult, WakeReceiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for anything that depends on the watcher thread.
pub const DEADLINE: Duration = Duration::from_secs(10);

/// Bridge configuration sized for tests.
pub fn test_config(queue_capacity: usize, drain_cap: u32) -> InterruptConfig {
    InterruptConfig {
        queue_capacity,
        drain_cap,
        ..InterruptConfig::default()
    }
}

/// A bridge attached to a fresh simulated line.
pub fn attached_bridge(config: InterruptConfig) -> (InterruptBridge, Arc<SimulatedLine>) {
    let line = Arc::new(SimulatedLine::new().expect("simulated line"));
    let mut bridge = InterruptBridge::new(config);
    bridge
        .attach(Arc::clone(&line) as Arc<dyn InterruptLine>)
        .expect("attach simulated line");
    (bridge, line)
}

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Wait for the watcher's startup level sample.
///
/// Until that sample is taken, asserting the line makes the watcher
/// synthesize a timestamp.
pub fn wait_for_startup_sample(line: &SimulatedLine) {
    assert!(
        wait_until(DEADLINE, || line.level_reads() > 0),
        "watcher never sampled the line"
    );
}

/// Loop-thread counters gathered by [`run_loop_until`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopTally {
    /// Wakes received from the channel.
    pub wakes: u64,
    /// Wakes that found nothing pending.
    pub duplicates: u64,
    /// Bursts serviced.
    pub bursts: u64,
}

/// Run the wake loop until `done` holds or [`DEADLINE`] passes.
pub fn run_loop_until(
    rx: &WakeReceiver,
    dispatcher: &mut Dispatcher,
    mut done: impl FnMut() -> bool,
) -> LoopTally {
    let mut tally = LoopTally::default();
    let deadline = Instant::now() + DEADLINE;
    while !done() && Instant::now() < deadline {
        match rx.wait(Duration::from_millis(20)) {
            WaitResult::Wake => {
                let outcome = dispatcher.on_wake();
                tally.wakes += 1;
                tally.bursts += u64::from(outcome.bursts);
                if outcome.duplicate {
                    tally.duplicates += 1;
                }
            }
            WaitResult::Timeout => {}
            WaitResult::Disconnected => break,
        }
    }
    tally
}
