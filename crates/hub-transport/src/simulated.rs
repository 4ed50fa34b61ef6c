//! In-memory sensor hub for tests and demos.
//!
//! Mimics how a BNO08x answers on I2C: every read transaction starts at the
//! head of its output buffer, so a header-only read leaves the frame in place
//! and a longer read consumes it. Bytes past the end of the frame read as
//! zero, and an idle hub answers a zero-length header.

use crate::framing::HEADER_LEN;
use crate::i2c::{I2cConnector, I2cSettings};
use hub_common::error::{HubError, HubResult};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct HubState {
    frames: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    connections: Vec<I2cSettings>,
    fail_connect: bool,
    failed_reads: usize,
    write_limit: Option<usize>,
}

/// Simulated sensor hub; clones share the same hub.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensorHub {
    state: Arc<Mutex<HubState>>,
}

impl SimulatedSensorHub {
    /// Create an idle hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a raw frame (header included) for the host to read.
    pub fn queue_frame(&self, frame: Vec<u8>) {
        self.lock().frames.push_back(frame);
    }

    /// Frames not yet consumed.
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.lock().frames.len()
    }

    /// Discard every queued frame, as a hub reset does.
    pub fn clear_frames(&self) {
        self.lock().frames.clear();
    }

    /// Every write transaction received, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Settings of every connection opened.
    #[must_use]
    pub fn connections(&self) -> Vec<I2cSettings> {
        self.lock().connections.clone()
    }

    /// Make subsequent connects fail.
    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Fail the next `count` read transactions.
    pub fn fail_reads(&self, count: usize) {
        self.lock().failed_reads = count;
    }

    /// Accept at most `limit` bytes per write.
    pub fn limit_writes(&self, limit: Option<usize>) {
        self.lock().write_limit = limit;
    }
}

impl I2cConnector for SimulatedSensorHub {
    type Bus = SimulatedBus;

    fn connect(&self, settings: &I2cSettings) -> HubResult<SimulatedBus> {
        let mut state = self.lock();
        if state.fail_connect {
            return Err(HubError::Device(format!(
                "simulated hub refused {settings}"
            )));
        }
        state.connections.push(*settings);
        Ok(SimulatedBus { hub: self.clone() })
    }
}

/// Open session on a [`SimulatedSensorHub`].
#[derive(Debug)]
pub struct SimulatedBus {
    hub: SimulatedSensorHub,
}

impl Read for SimulatedBus {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.hub.lock();
        if state.failed_reads > 0 {
            state.failed_reads -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "simulated NACK"));
        }

        buf.fill(0);
        let consume = buf.len() > HEADER_LEN;
        if let Some(frame) = state.frames.front() {
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            if consume {
                state.frames.pop_front();
            }
        }
        Ok(buf.len())
    }
}

impl Write for SimulatedBus {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.hub.lock();
        let accepted = state.write_limit.map_or(buf.len(), |l| l.min(buf.len()));
        state.writes.push(buf[..accepted].to_vec());
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
