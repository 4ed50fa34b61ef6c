//! Edge storm tests.
//!
//! A producer thread fires edges with random gaps while the loop thread
//! services wakes. With the line held asserted and one service call per
//! burst, every fired timestamp must be serviced exactly once, in order,
//! and the number of wakes must stay between one and the number of edges.

use super::common::{attached_bridge, run_loop_until, test_config, wait_for_startup_sample};
use hub_irq::wake_channel;
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Fire `gaps.len()` edges, sleeping `gaps[i]` microseconds before each.
fn storm(gaps: &[u64]) -> (Vec<u32>, Vec<u32>, u64) {
    let (mut bridge, line) = attached_bridge(test_config(128, 1));
    let burst = bridge.burst_handle();

    let serviced = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&serviced);
    let (tx, rx) = wake_channel();
    let mut dispatcher = bridge
        .start(tx, move || {
            if let Some(ts) = burst.get() {
                log.borrow_mut().push(ts);
            }
        })
        .expect("start bridge");

    wait_for_startup_sample(&line);
    line.set_asserted(true);

    let expected: Vec<u32> = (1..=gaps.len()).map(|i| i as u32 * 100).collect();
    let producer = {
        let line = Arc::clone(&line);
        let stamps = expected.clone();
        let gaps = gaps.to_vec();
        thread::spawn(move || {
            for (ts, gap) in stamps.into_iter().zip(gaps) {
                thread::sleep(Duration::from_micros(gap));
                line.fire_edge(ts);
            }
        })
    };

    let total = expected.len();
    let tally = run_loop_until(&rx, &mut dispatcher, || serviced.borrow().len() >= total);
    producer.join().expect("producer thread");
    bridge.teardown().expect("teardown");

    let got = serviced.borrow().clone();
    (expected, got, tally.wakes)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_edge_storm_no_loss_no_duplication(gaps in prop::collection::vec(0u64..300, 1..48)) {
        let (expected, serviced, wakes) = storm(&gaps);
        prop_assert_eq!(&serviced, &expected);
        prop_assert!(wakes >= 1);
        prop_assert!(wakes <= expected.len() as u64);
    }
}

#[test]
fn test_burst_of_edges_without_gaps() {
    let gaps = vec![0u64; 64];
    let (expected, serviced, wakes) = storm(&gaps);
    assert_eq!(serviced, expected);
    assert!((1..=64).contains(&wakes));
}

#[test]
fn test_wakes_coalesce_while_loop_is_busy() {
    let (mut bridge, line) = attached_bridge(test_config(128, 1));
    let (tx, rx) = wake_channel();
    let mut dispatcher = bridge.start(tx, || {}).expect("start bridge");
    wait_for_startup_sample(&line);
    line.set_asserted(true);

    // Loop thread is not servicing: every pass after the first coalesces.
    for ts in 0..10 {
        line.fire_edge(ts);
        thread::sleep(Duration::from_millis(2));
    }
    assert!(super::common::wait_until(super::common::DEADLINE, || {
        bridge.stats().edges == 10
    }));

    let stats = bridge.stats();
    assert_eq!(stats.wakes_sent, 1);
    assert_eq!(stats.wakes_sent + stats.wakes_coalesced, stats.drain_passes);

    assert_eq!(rx.wait(Duration::from_secs(5)), hub_irq::WaitResult::Wake);
    let outcome = dispatcher.on_wake();
    assert_eq!(outcome.bursts, 10);
    assert_eq!(dispatcher.queued(), 0);
    bridge.teardown().expect("teardown");
}
