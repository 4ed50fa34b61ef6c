//! Edge watcher thread.
//!
//! A dedicated thread blocks in `poll(2)` on two descriptors: the interrupt
//! line's event fd and a stop eventfd. On edge readiness it drains every
//! buffered edge into the timestamp queue and announces the pass through the
//! pending flag, calling the wake notifier only when the flag was clear.
//!
//! The watcher never runs service callbacks and never touches the transport.
//! It exits when the stop fd fires, or when poll or the line fd reports an
//! error or hangup.

use crate::line::InterruptLine;
use crate::queue::TimestampQueue;
use crate::realtime::apply_watcher_scheduling;
use crate::wake::{PendingFlag, WakeNotifier};
use hub_common::config::WatcherConfig;
use hub_common::error::{HubError, HubResult};
use hub_common::stats::IrqStats;
use hub_common::time::monotonic_now_us32;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// State shared by one watcher run and its consumer dispatch.
#[derive(Debug)]
pub struct IrqShared {
    pub(crate) queue: TimestampQueue,
    pub(crate) pending: PendingFlag,
    pub(crate) stats: Arc<IrqStats>,
}

impl IrqShared {
    /// Fresh queue and cleared pending flag reporting to `stats`.
    #[must_use]
    pub fn new(queue_capacity: usize, stats: Arc<IrqStats>) -> Self {
        Self {
            queue: TimestampQueue::with_stats(queue_capacity, Arc::clone(&stats)),
            pending: PendingFlag::new(),
            stats,
        }
    }

    /// Timestamps waiting for dispatch.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether a wake is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_pending()
    }
}

/// Stop request for the watcher, backed by a non-blocking eventfd.
pub struct StopSignal {
    efd: EventFd,
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("fd", &self.efd.as_fd().as_raw_fd())
            .finish()
    }
}

impl StopSignal {
    /// Create a lowered stop signal.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Resource`] if the eventfd cannot be created.
    pub fn new() -> HubResult<Self> {
        EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
            .map(|efd| Self { efd })
            .map_err(|e| HubError::Resource(format!("failed to create stop eventfd: {e}")))
    }

    /// Make the stop fd readable.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Resource`] if the eventfd write fails.
    pub fn raise(&self) -> HubResult<()> {
        self.efd
            .write(1)
            .map(drop)
            .map_err(|e| HubError::Resource(format!("failed to signal watcher stop: {e}")))
    }

    /// Consume any pending stop request.
    pub fn clear(&self) {
        match self.efd.read() {
            // Nothing was pending.
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(e) => warn!(error = %e, "Failed to clear watcher stop signal"),
        }
    }

    fn as_fd(&self) -> BorrowedFd<'_> {
        self.efd.as_fd()
    }
}

/// Handle to a running edge watcher thread.
#[derive(Debug)]
pub struct EdgeWatcher {
    handle: Option<JoinHandle<()>>,
    stop: Arc<StopSignal>,
}

impl EdgeWatcher {
    /// Spawn the watcher thread.
    ///
    /// Any stale stop request is cleared first. On startup the thread applies
    /// `schedule` to itself, then samples the line once: if the line is
    /// already asserted, a timestamp is synthesized and a wake emitted so an
    /// edge that fired before the request is not missed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Resource`] if the thread cannot be spawned.
    pub fn spawn(
        line: Arc<dyn InterruptLine>,
        stop: Arc<StopSignal>,
        shared: Arc<IrqShared>,
        notifier: Box<dyn WakeNotifier>,
        schedule: WatcherConfig,
    ) -> HubResult<Self> {
        stop.clear();

        let watch = WatchLoop {
            line,
            stop: Arc::clone(&stop),
            shared,
            notifier,
        };

        let handle = thread::Builder::new()
            .name("hub-irq-watcher".into())
            .spawn(move || {
                if let Err(e) = apply_watcher_scheduling(&schedule) {
                    warn!(error = %e, "Watcher scheduling not applied");
                }
                watch.run();
            })
            .map_err(|e| HubError::Resource(format!("failed to spawn watcher thread: {e}")))?;

        info!("Edge watcher started");
        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    /// Whether the thread is still polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and join it. Calling again after success is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ThreadingFault`] when called on the watcher thread
    /// itself, and [`HubError::Resource`] if the stop fd cannot be signalled.
    pub fn stop(&mut self) -> HubResult<()> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(());
        };

        if handle.thread().id() == thread::current().id() {
            return Err(HubError::ThreadingFault(
                "edge watcher cannot be stopped from its own thread".into(),
            ));
        }

        self.stop.raise()?;

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("Edge watcher thread panicked: {:?}", e);
            }
        }
        info!("Edge watcher stopped");
        Ok(())
    }
}

impl Drop for EdgeWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "Failed to stop edge watcher on drop");
        }
    }
}

struct WatchLoop {
    line: Arc<dyn InterruptLine>,
    stop: Arc<StopSignal>,
    shared: Arc<IrqShared>,
    notifier: Box<dyn WakeNotifier>,
}

impl WatchLoop {
    fn run(&self) {
        debug!("Edge watcher thread running");
        self.synthesize_if_asserted();

        loop {
            let (line_events, stop_events) = {
                let mut fds = [
                    PollFd::new(self.line.event_fd(), PollFlags::POLLIN),
                    PollFd::new(self.stop.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        error!(error = %e, "poll failed, edge watcher exiting");
                        break;
                    }
                }
                (
                    fds[0].revents().unwrap_or_else(PollFlags::empty),
                    fds[1].revents().unwrap_or_else(PollFlags::empty),
                )
            };

            if stop_events.contains(PollFlags::POLLIN) {
                self.stop.clear();
                debug!("Stop requested");
                break;
            }

            if line_events.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
            {
                error!(revents = ?line_events, "Interrupt line fd error, edge watcher exiting");
                break;
            }

            if line_events.contains(PollFlags::POLLIN) {
                let edges = self.drain_edges();
                trace!(edges, "Drained interrupt edges");
                self.signal_wake();
            }
        }

        debug!("Edge watcher thread exiting");
    }

    fn synthesize_if_asserted(&self) {
        match self.line.is_asserted() {
            Ok(true) => {
                let now = monotonic_now_us32();
                debug!(timestamp_us = now, "Line asserted at start, synthesizing edge");
                self.shared.queue.push(now);
                self.shared.stats.record_synthesized();
                self.signal_wake();
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Initial level read failed"),
        }
    }

    fn drain_edges(&self) -> usize {
        let shared = &self.shared;
        let mut sink = |ts: u32| {
            shared.queue.push(ts);
            shared.stats.record_edge();
        };

        let mut total = 0;
        loop {
            match self.line.read_edges(&mut sink) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to read interrupt edge events");
                    break;
                }
            }
            if !readable_now(self.line.event_fd()) {
                break;
            }
        }

        shared.stats.record_drain_pass();
        total
    }

    fn signal_wake(&self) {
        if self.shared.pending.raise() {
            self.shared.stats.record_wake_sent();
            self.notifier.notify();
        } else {
            self.shared.stats.record_wake_coalesced();
        }
    }
}

/// Zero-timeout readiness check.
fn readable_now(fd: BorrowedFd<'_>) -> bool {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(n) if n > 0 => fds[0]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN)),
        _ => false,
    }
}
