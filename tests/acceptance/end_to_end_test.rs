//! End-to-end tests: interrupt bridge feeding the I2C HAL.
//!
//! The hub queues frames and pulls INT low; the service callback polls the
//! HAL once per call and releases INT when the hub has nothing left. Every
//! frame read during a burst must carry that burst's trigger timestamp.

use super::common::{attached_bridge, run_loop_until, test_config, wait_for_startup_sample};
use hub_common::{ClockSource, HubError};
use hub_irq::{wake_channel, InterruptLine};
use hub_transport::{shtp_packet, Frame, I2cHal, I2cSettings, ShtpHal, SimulatedSensorHub};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Clock far away from any edge timestamp used below.
#[derive(Debug)]
struct FixedClock(u32);

impl ClockSource for FixedClock {
    fn now_us(&self) -> u32 {
        self.0
    }
}

#[test]
fn test_frames_carry_burst_timestamp() {
    let (mut bridge, line) = attached_bridge(test_config(16, 64));
    let hub = SimulatedSensorHub::new();
    let mut hal = I2cHal::new(hub.clone(), I2cSettings::new(1, 0x4A), bridge.burst_handle())
        .with_reset_settle(Duration::ZERO)
        .with_clock(Arc::new(FixedClock(7)));
    hal.open().unwrap();
    let hal = Rc::new(RefCell::new(hal));

    let frames: Rc<RefCell<Vec<(Frame, u8)>>> = Rc::new(RefCell::new(Vec::new()));
    let service = {
        let hal = Rc::clone(&hal);
        let frames = Rc::clone(&frames);
        let line = Arc::clone(&line);
        let hub = hub.clone();
        let mut buf = [0u8; 256];
        move || {
            if let Some(frame) = hal.borrow_mut().read(&mut buf) {
                frames.borrow_mut().push((frame, buf[3]));
            }
            if hub.pending_frames() == 0 {
                line.set_asserted(false);
            }
        }
    };

    let (tx, rx) = wake_channel();
    let mut dispatcher = bridge.start(tx, service).unwrap();
    wait_for_startup_sample(&line);

    for (seq, ts) in [(0u8, 1_000u32), (1, 2_000)] {
        hub.queue_frame(shtp_packet(3, seq, &[0xAA; 12]));
        line.set_asserted(true);
        line.fire_edge(ts);
        run_loop_until(&rx, &mut dispatcher, || frames.borrow().len() > usize::from(seq));
    }

    let frames = frames.borrow();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].0, Frame { len: 20, timestamp_us: 1_000 });
    assert_eq!(frames[0].1, 0);
    assert_eq!(frames[1].0, Frame { len: 20, timestamp_us: 2_000 });
    assert_eq!(frames[1].1, 1);
    assert_eq!(bridge.current_burst(), None);

    bridge.teardown().unwrap();
    hal.borrow_mut().close();
}

#[test]
fn test_read_outside_burst_uses_clock() {
    let hub = SimulatedSensorHub::new();
    hub.queue_frame(shtp_packet(2, 0, &[1, 2, 3, 4]));

    let (bridge, _line) = attached_bridge(test_config(16, 8));
    let mut hal = I2cHal::new(hub, I2cSettings::default(), bridge.burst_handle())
        .with_reset_settle(Duration::ZERO)
        .with_clock(Arc::new(FixedClock(42)));
    hal.open().unwrap();

    let mut buf = [0u8; 64];
    assert!(hal.read(&mut buf).is_none());
    let frame = hal.read(&mut buf).unwrap();
    assert_eq!(frame.timestamp_us, 42);
    assert_eq!(hal.time_us(), 42);
}

#[test]
fn test_multi_frame_burst_drains_hub() {
    let (mut bridge, line) = attached_bridge(test_config(16, 64));
    let hub = SimulatedSensorHub::new();
    let mut hal = I2cHal::new(hub.clone(), I2cSettings::default(), bridge.burst_handle())
        .with_reset_settle(Duration::ZERO);
    hal.open().unwrap();

    let count = Rc::new(RefCell::new(0usize));
    let service = {
        let count = Rc::clone(&count);
        let line = Arc::clone(&line);
        let hub = hub.clone();
        let mut buf = [0u8; 64];
        move || {
            if hal.read(&mut buf).is_some() {
                *count.borrow_mut() += 1;
            }
            if hub.pending_frames() == 0 {
                line.set_asserted(false);
            }
        }
    };

    let (tx, rx) = wake_channel();
    let mut dispatcher = bridge.start(tx, service).unwrap();
    wait_for_startup_sample(&line);

    for seq in 0..5u8 {
        hub.queue_frame(shtp_packet(3, seq, &[seq; 8]));
    }
    line.set_asserted(true);
    line.fire_edge(500);

    let tally = run_loop_until(&rx, &mut dispatcher, || *count.borrow() == 5);
    assert_eq!(*count.borrow(), 5);
    assert_eq!(tally.bursts, 1);
    assert_eq!(hub.pending_frames(), 0);
    assert!(!line.is_asserted().unwrap());
    assert_eq!(bridge.stats().drain_cap_hits, 0);

    bridge.teardown().unwrap();
}

#[test]
fn test_open_failure_is_device_error() {
    let hub = SimulatedSensorHub::new();
    hub.fail_connect(true);
    let (bridge, _line) = attached_bridge(test_config(16, 8));
    let mut hal = I2cHal::new(hub, I2cSettings::default(), bridge.burst_handle());
    assert!(matches!(hal.open(), Err(HubError::Device(_))));
    assert!(!hal.is_open());
}
