//! Lifecycle acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Stop and teardown are idempotent
//! - A stopped bridge restarts on the same line with a fresh queue
//! - A line already asserted at start produces a wake with no edge
//! - A hung-up line ends the watcher and disconnects the wake channel

use super::common::{
    attached_bridge, run_loop_until, test_config, wait_for_startup_sample, wait_until, DEADLINE,
};
use hub_common::BridgeState;
use hub_irq::{wake_channel, FnNotifier, WaitResult};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_stop_twice_then_teardown_twice() {
    let (mut bridge, _line) = attached_bridge(test_config(16, 8));
    let (tx, _rx) = wake_channel();
    let _dispatcher = bridge.start(tx, || {}).unwrap();

    bridge.stop().unwrap();
    bridge.stop().unwrap();
    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert!(!bridge.is_watching());

    bridge.teardown().unwrap();
    bridge.teardown().unwrap();
    assert_eq!(bridge.state(), BridgeState::Idle);
}

#[test]
fn test_teardown_while_running_stops_watcher() {
    let (mut bridge, _line) = attached_bridge(test_config(16, 8));
    let (tx, rx) = wake_channel();
    let _dispatcher = bridge.start(tx, || {}).unwrap();
    assert!(bridge.is_watching());

    bridge.teardown().unwrap();
    assert_eq!(bridge.state(), BridgeState::Idle);
    assert_eq!(rx.wait(Duration::from_millis(100)), WaitResult::Disconnected);
}

#[test]
fn test_restart_after_stop_services_new_edges() {
    let (mut bridge, line) = attached_bridge(test_config(16, 1));
    let calls = Rc::new(Cell::new(0u32));

    let (tx, _rx) = wake_channel();
    let first = bridge.start(tx, || {}).unwrap();
    wait_for_startup_sample(&line);
    line.fire_edge(1);
    assert!(wait_until(DEADLINE, || first.queued() == 1));
    bridge.stop().unwrap();
    drop(first);

    line.set_asserted(true);
    let counter = Rc::clone(&calls);
    let (tx, rx) = wake_channel();
    let mut second = bridge
        .start(tx, move || counter.set(counter.get() + 1))
        .unwrap();
    assert_eq!(bridge.state(), BridgeState::Running);

    // The asserted line is synthesized on restart; the old queue is gone.
    let tally = run_loop_until(&rx, &mut second, || calls.get() >= 1);
    assert_eq!(tally.bursts, 1);
    assert_eq!(calls.get(), 1);
    assert!(bridge.stats().synthesized >= 1);

    bridge.teardown().unwrap();
}

#[test]
fn test_asserted_line_at_start_wakes_without_edge() {
    let (mut bridge, line) = attached_bridge(test_config(16, 4));
    line.set_asserted(true);

    let burst = bridge.burst_handle();
    let seen = Rc::new(Cell::new(None));
    let record = Rc::clone(&seen);
    let settle = Arc::clone(&line);
    let (tx, rx) = wake_channel();
    let mut dispatcher = bridge
        .start(tx, move || {
            record.set(burst.get());
            settle.set_asserted(false);
        })
        .unwrap();

    assert_eq!(rx.wait(DEADLINE), WaitResult::Wake);
    let outcome = dispatcher.on_wake();
    assert!(outcome.bursts >= 1);
    assert!(seen.get().is_some());
    assert_eq!(bridge.stats().edges, 0);
    assert_eq!(bridge.stats().synthesized, 1);

    bridge.teardown().unwrap();
}

#[test]
fn test_hung_up_line_ends_watcher() {
    let (mut bridge, line) = attached_bridge(test_config(16, 4));
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _dispatcher = bridge
        .start(
            FnNotifier(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
            || {},
        )
        .unwrap();

    line.hang_up();
    assert!(wait_until(DEADLINE, || !bridge.is_watching()));
    assert_eq!(notified.load(Ordering::Relaxed), 0);

    // Stop still joins cleanly and teardown releases the line.
    bridge.stop().unwrap();
    bridge.teardown().unwrap();
    assert!(!bridge.line_active());
}
