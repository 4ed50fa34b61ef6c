//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT request shutdown; SIGHUP requests an immediate stats
//! dump. The handlers only store to static atomics; the loop thread reads
//! them between wakes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static STATS_FLAG: AtomicBool = AtomicBool::new(false);
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
    /// SIGHUP - Dump statistics.
    Hangup,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Requests observed by the loop thread.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    stats_requested: AtomicBool,
}

impl SignalState {
    /// Create a new signal state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Check if a stats dump has been requested (and clear the flag).
    #[inline]
    pub fn take_stats_request(&self) -> bool {
        self.stats_requested.swap(false, Ordering::Relaxed)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Request a stats dump (can be called from any thread).
    pub fn request_stats(&self) {
        self.stats_requested.store(true, Ordering::Relaxed);
    }
}

/// Handle for signal management.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM, SIGINT, and SIGHUP.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(handler)
    }

    /// Fold pending process signals into the shared state.
    fn absorb_signals(&self) {
        if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
            info!("Shutdown signal received");
            self.state.request_shutdown();
        }
        if STATS_FLAG.swap(false, Ordering::Relaxed) {
            self.state.request_stats();
        }
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.absorb_signals();
        self.state.shutdown_requested()
    }

    /// Check if a stats dump has been requested (clears the flag).
    #[inline]
    pub fn take_stats_request(&self) -> bool {
        self.absorb_signals();
        self.state.take_stats_request()
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        self.state.request_shutdown();
    }

    /// Get the total number of signals received.
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::os::raw::c_int;

    extern "C" fn shutdown_handler(_: c_int) {
        SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }

    extern "C" fn stats_handler(_: c_int) {
        SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
        STATS_FLAG.store(true, Ordering::Relaxed);
    }

    let shutdown = SigAction::new(
        SigHandler::Handler(shutdown_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let stats = SigAction::new(
        SigHandler::Handler(stats_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    for (signal, action, kind) in [
        (Signal::SIGTERM, &shutdown, SignalKind::Terminate),
        (Signal::SIGINT, &shutdown, SignalKind::Interrupt),
        (Signal::SIGHUP, &stats, SignalKind::Hangup),
    ] {
        // SAFETY: the handlers only touch atomics, which is async-signal-safe.
        #[allow(unsafe_code)]
        unsafe { sigaction(signal, action) }.map_err(std::io::Error::from)?;
        debug!(signal = %kind, "Signal handler registered");
    }
    Ok(())
}
