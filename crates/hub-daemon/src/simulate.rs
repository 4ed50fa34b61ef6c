//! Simulated hardware for `--simulate`.
//!
//! A generator thread plays the sensor hub: it queues a report frame, pulls
//! INT low, and fires a falling edge at a fixed rate. The loop side releases
//! INT once the host has drained every queued frame, as the real hub does.

use hub_common::time::monotonic_now_us32;
use hub_irq::SimulatedLine;
use hub_transport::{shtp_packet, SimulatedSensorHub};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// SHTP channel carrying input reports.
const REPORT_CHANNEL: u8 = 3;

/// Frames produced per simulated interrupt.
const FRAMES_PER_EDGE: usize = 2;

/// Simulated interrupt line and hub sharing one generator thread.
#[derive(Debug)]
pub struct SimulatedHardware {
    pub line: Arc<SimulatedLine>,
    pub hub: SimulatedSensorHub,
    stop: Arc<AtomicBool>,
    generator: Option<JoinHandle<()>>,
}

impl SimulatedHardware {
    /// Create idle simulated hardware.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            line: Arc::new(SimulatedLine::new()?),
            hub: SimulatedSensorHub::new(),
            stop: Arc::new(AtomicBool::new(false)),
            generator: None,
        })
    }

    /// Start producing one interrupt every `period`.
    pub fn start(&mut self, period: Duration) -> std::io::Result<()> {
        let line = Arc::clone(&self.line);
        let hub = self.hub.clone();
        let stop = Arc::clone(&self.stop);

        let handle = thread::Builder::new()
            .name("hub-sim".into())
            .spawn(move || {
                let mut sequence: u8 = 0;
                while !stop.load(Ordering::Acquire) {
                    for _ in 0..FRAMES_PER_EDGE {
                        let payload = [0x01, sequence, 0x00, 0x00, 0x10, 0x00, 0x20, 0x00, 0x30, 0x00];
                        hub.queue_frame(shtp_packet(REPORT_CHANNEL, sequence, &payload));
                        sequence = sequence.wrapping_add(1);
                    }
                    line.set_asserted(true);
                    line.fire_edge(monotonic_now_us32());
                    thread::sleep(period);
                }
                debug!("Simulated hub generator stopped");
            })?;

        self.generator = Some(handle);
        Ok(())
    }

    /// Closure that releases INT once the hub has nothing left to send.
    ///
    /// Run it after every service poll on the loop thread.
    pub fn settler(&self) -> impl Fn() + 'static {
        let line = Arc::clone(&self.line);
        let hub = self.hub.clone();
        move || {
            if hub.pending_frames() == 0 {
                line.set_asserted(false);
            }
        }
    }

    /// Stop and join the generator.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.generator.take() {
            if handle.join().is_err() {
                warn!("Simulated hub generator panicked");
            }
        }
    }
}

impl Drop for SimulatedHardware {
    fn drop(&mut self) {
        self.stop();
    }
}
