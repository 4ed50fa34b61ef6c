//! Wake channel from the watcher thread to the embedding loop.
//!
//! Two pieces cooperate:
//!
//! - [`PendingFlag`]: a single-slot indicator that coalesces any number of
//!   drain passes into at most one outstanding wake.
//! - [`WakeNotifier`]: the embedding loop's "run this on my thread" primitive.
//!   The watcher calls it only on the clear → set edge of the pending flag.
//!
//! # Protocol
//!
//! ```text
//! watcher:  push(ts) ... ; if flag.raise() { notifier.notify() }
//! loop:     if !flag.take() { return }          // duplicate wake
//!           loop { drain queue; if !flag.take() { break } }
//! ```
//!
//! The consumer clears the flag before draining and takes it once more after
//! the queue looks empty, so an edge queued mid-drain is either drained in
//! the same wake or announced by a fresh notification.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::trace;

/// Single-slot coalescing wake indicator.
#[derive(Debug, Default)]
pub struct PendingFlag {
    pending: CachePadded<AtomicBool>,
}

impl PendingFlag {
    /// Create a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true if it was clear, i.e. the caller owns the wake.
    #[inline]
    pub fn raise(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Clear the flag. Returns true if it was set.
    #[inline]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Whether a wake is outstanding.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Reset to clear without reporting the previous value.
    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

/// Schedules consumer dispatch on the loop-owning thread.
///
/// Called from the watcher thread. Implementations must not block and must
/// not run dispatch inline; they only arrange for the loop to call
/// [`Dispatcher::on_wake`](crate::Dispatcher::on_wake) later.
pub trait WakeNotifier: Send + Sync {
    /// Request one wake on the loop thread.
    fn notify(&self);
}

/// Adapter turning a closure into a [`WakeNotifier`].
pub struct FnNotifier<F>(pub F);

impl<F> WakeNotifier for FnNotifier<F>
where
    F: Fn() + Send + Sync,
{
    fn notify(&self) {
        (self.0)();
    }
}

/// Sending half of a [`wake_channel`].
#[derive(Debug, Clone)]
pub struct WakeSender {
    tx: Sender<()>,
}

impl WakeNotifier for WakeSender {
    fn notify(&self) {
        // A dropped receiver means the loop is gone; nothing left to wake.
        if self.tx.send(()).is_err() {
            trace!("Wake receiver dropped, discarding wake");
        }
    }
}

/// Outcome of waiting on a [`WakeReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A wake arrived; call `on_wake` now.
    Wake,
    /// No wake within the timeout.
    Timeout,
    /// Every sender is gone (watcher stopped and notifier dropped).
    Disconnected,
}

/// Receiving half of a [`wake_channel`], owned by the loop thread.
#[derive(Debug)]
pub struct WakeReceiver {
    rx: Receiver<()>,
}

impl WakeReceiver {
    /// Block up to `timeout` for the next wake.
    pub fn wait(&self, timeout: Duration) -> WaitResult {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => WaitResult::Wake,
            Err(RecvTimeoutError::Timeout) => WaitResult::Timeout,
            Err(RecvTimeoutError::Disconnected) => WaitResult::Disconnected,
        }
    }

    /// Non-blocking check for a wake, for loops that poll.
    pub fn try_wake(&self) -> WaitResult {
        match self.rx.try_recv() {
            Ok(()) => WaitResult::Wake,
            Err(TryRecvError::Empty) => WaitResult::Timeout,
            Err(TryRecvError::Disconnected) => WaitResult::Disconnected,
        }
    }
}

/// Create a wake channel for loops that block on a receiver.
#[must_use]
pub fn wake_channel() -> (WakeSender, WakeReceiver) {
    let (tx, rx) = mpsc::channel();
    (WakeSender { tx }, WakeReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_flag_coalesces_raises() {
        let flag = PendingFlag::new();
        assert!(flag.raise());
        assert!(!flag.raise());
        assert!(!flag.raise());
        assert!(flag.is_pending());

        assert!(flag.take());
        assert!(!flag.take());
        assert!(flag.raise());
    }

    #[test]
    fn test_channel_delivers_and_times_out() {
        let (tx, rx) = wake_channel();
        assert_eq!(rx.try_wake(), WaitResult::Timeout);

        tx.notify();
        assert_eq!(rx.wait(Duration::from_millis(10)), WaitResult::Wake);
        assert_eq!(rx.wait(Duration::from_millis(10)), WaitResult::Timeout);

        drop(tx);
        assert_eq!(rx.wait(Duration::from_millis(10)), WaitResult::Disconnected);
    }

    #[test]
    fn test_notify_after_receiver_dropped_is_silent() {
        let (tx, rx) = wake_channel();
        drop(rx);
        tx.notify();
    }

    #[test]
    fn test_fn_notifier() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let notifier = FnNotifier(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        notifier.notify();
        notifier.notify();
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
