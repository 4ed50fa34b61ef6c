//! Interrupt line abstraction.
//!
//! The watcher thread polls [`InterruptLine::event_fd`] and drains edges with
//! [`InterruptLine::read_edges`]; consumer dispatch samples the level with
//! [`InterruptLine::is_asserted`]. Both may run concurrently, so every method
//! takes `&self`.
//!
//! [`GpioLine`](crate::GpioLine) drives real hardware; [`SimulatedLine`]
//! stands in for it in tests and in the daemon's simulate mode.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::fcntl::OFlag;
use nix::unistd::pipe2;

/// An active-low interrupt input with falling-edge events.
pub trait InterruptLine: Send + Sync {
    /// Descriptor that polls readable while edge events are buffered.
    fn event_fd(&self) -> BorrowedFd<'_>;

    /// Read the edge events buffered right now, feeding each falling-edge
    /// timestamp (µs, wrapping) to `sink`.
    ///
    /// Called only after the descriptor polled readable, and must not block.
    /// Returns the number of timestamps delivered; 0 means nothing was left.
    fn read_edges(&self, sink: &mut dyn FnMut(u32)) -> io::Result<usize>;

    /// Sample the line level. `true` means asserted (electrically low).
    fn is_asserted(&self) -> io::Result<bool>;
}

/// Scripted result of one simulated level read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelRead {
    /// Line reads low.
    Asserted,
    /// Line reads high.
    Deasserted,
    /// The read fails with an I/O error.
    Fault,
}

/// In-memory interrupt line backed by a non-blocking pipe.
///
/// Each fired edge queues its timestamp and writes one byte to the pipe so the
/// read end polls readable exactly like a GPIO line request fd. Dropping the
/// write end with [`hang_up`](Self::hang_up) makes the read end report POLLHUP.
#[derive(Debug)]
pub struct SimulatedLine {
    reader: File,
    writer: Mutex<Option<File>>,
    edges: Mutex<VecDeque<u32>>,
    asserted: AtomicBool,
    script: Mutex<VecDeque<LevelRead>>,
    level_reads: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedLine {
    /// Create a deasserted line with no pending edges.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the pipe cannot be created.
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        Ok(Self {
            reader: File::from(reader),
            writer: Mutex::new(Some(File::from(writer))),
            edges: Mutex::new(VecDeque::new()),
            asserted: AtomicBool::new(false),
            script: Mutex::new(VecDeque::new()),
            level_reads: AtomicU64::new(0),
        })
    }

    /// Queue a falling edge stamped `timestamp_us`.
    pub fn fire_edge(&self, timestamp_us: u32) {
        lock(&self.edges).push_back(timestamp_us);
        if let Some(writer) = lock(&self.writer).as_mut() {
            // A full pipe is already readable; the timestamp is queued either way.
            let _ = writer.write(&[1]);
        }
    }

    /// Set the level reported once the script is exhausted.
    pub fn set_asserted(&self, asserted: bool) {
        self.asserted.store(asserted, Ordering::Release);
    }

    /// Queue level reads to be returned before falling back to the set level.
    pub fn script_levels<I>(&self, reads: I)
    where
        I: IntoIterator<Item = LevelRead>,
    {
        lock(&self.script).extend(reads);
    }

    /// Close the write end so the event fd reports a hangup.
    pub fn hang_up(&self) {
        lock(&self.writer).take();
    }

    /// Number of level reads served so far.
    #[must_use]
    pub fn level_reads(&self) -> u64 {
        self.level_reads.load(Ordering::Relaxed)
    }
}

impl InterruptLine for SimulatedLine {
    fn event_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    fn read_edges(&self, sink: &mut dyn FnMut(u32)) -> io::Result<usize> {
        let mut doorbell = [0u8; 64];
        loop {
            match (&self.reader).read(&mut doorbell) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let pending: Vec<u32> = lock(&self.edges).drain(..).collect();
        for &ts in &pending {
            sink(ts);
        }
        Ok(pending.len())
    }

    fn is_asserted(&self) -> io::Result<bool> {
        self.level_reads.fetch_add(1, Ordering::Relaxed);
        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(LevelRead::Asserted) => Ok(true),
            Some(LevelRead::Deasserted) => Ok(false),
            Some(LevelRead::Fault) => Err(io::Error::other("simulated level read fault")),
            None => Ok(self.asserted.load(Ordering::Acquire)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_are_delivered_in_order() {
        let line = SimulatedLine::new().unwrap();
        line.fire_edge(3);
        line.fire_edge(1);

        let mut seen = Vec::new();
        let n = line.read_edges(&mut |ts| seen.push(ts)).unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, vec![3, 1]);

        // Nothing left after a drain
        assert_eq!(line.read_edges(&mut |_| {}).unwrap(), 0);
    }

    #[test]
    fn test_script_precedes_level() {
        let line = SimulatedLine::new().unwrap();
        line.set_asserted(true);
        line.script_levels([LevelRead::Deasserted, LevelRead::Fault]);

        assert!(!line.is_asserted().unwrap());
        assert!(line.is_asserted().is_err());
        assert!(line.is_asserted().unwrap());
        assert_eq!(line.level_reads(), 3);
    }
}
