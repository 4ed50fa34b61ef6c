//! Lifecycle manager for the interrupt bridge.
//!
//! ```text
//! IDLE --setup/attach--> CONFIGURED --start--> RUNNING --stop--> STOPPED
//!   ^                        |                    ^                 |
//!   +-------teardown---------+                    +-----start-------+
//!   +-------------------------teardown-----------------------------+
//! ```
//!
//! Setup acquires the line and the stop eventfd. Start spawns the watcher
//! with a fresh queue and pending flag and hands back the [`Dispatcher`] the
//! loop thread drives. Stop joins the watcher; teardown releases the line.

use crate::dispatch::Dispatcher;
use crate::gpio::GpioLine;
use crate::line::InterruptLine;
use crate::wake::WakeNotifier;
use crate::watcher::{EdgeWatcher, IrqShared, StopSignal};
use hub_common::config::{resolve_chip_path, InterruptConfig};
use hub_common::error::{HubError, HubResult};
use hub_common::state::{BridgeState, StateMachine};
use hub_common::stats::{IrqStats, IrqStatsSnapshot};
use hub_common::time::CurrentBurst;
use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Owns the interrupt line, the watcher thread, and the lifecycle state.
pub struct InterruptBridge {
    config: InterruptConfig,
    state: StateMachine,
    line: Option<Arc<dyn InterruptLine>>,
    stop_signal: Option<Arc<StopSignal>>,
    watcher: Option<EdgeWatcher>,
    burst: Arc<CurrentBurst>,
    stats: Arc<IrqStats>,
}

impl fmt::Debug for InterruptBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptBridge")
            .field("state", &self.state.state())
            .field("line_fd", &self.line.as_ref().map(|l| l.event_fd().as_raw_fd()))
            .field("watcher", &self.watcher)
            .field("current_burst", &self.burst.get())
            .finish_non_exhaustive()
    }
}

impl InterruptBridge {
    /// Create an idle bridge.
    #[must_use]
    pub fn new(config: InterruptConfig) -> Self {
        Self {
            config,
            state: StateMachine::new(),
            line: None,
            stop_signal: None,
            watcher: None,
            burst: Arc::new(CurrentBurst::new()),
            stats: Arc::new(IrqStats::new()),
        }
    }

    /// Request `line_offset` on `chip` and prepare the stop signal.
    ///
    /// `chip` is a device path or a bare name resolved under `/dev/`.
    /// Returns the line's event descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Resource`] if the chip, line, or eventfd cannot be
    /// acquired; nothing stays held on failure. Returns
    /// [`HubError::InvalidStateTransition`] unless the bridge is idle.
    pub fn setup(&mut self, chip: &str, line_offset: u32) -> HubResult<RawFd> {
        self.check_transition(BridgeState::Configured)?;
        let line = GpioLine::open(
            &resolve_chip_path(chip),
            line_offset,
            &self.config.consumer_label,
        )?;
        self.attach(Arc::new(line))
    }

    /// Request the line named by the bridge configuration.
    ///
    /// # Errors
    ///
    /// Same as [`setup`](Self::setup).
    pub fn setup_from_config(&mut self) -> HubResult<RawFd> {
        let chip = self.config.chip.clone();
        self.setup(&chip, self.config.line_offset)
    }

    /// Configure the bridge around an already acquired line.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Resource`] if the stop eventfd cannot be created,
    /// or [`HubError::InvalidStateTransition`] unless the bridge is idle.
    pub fn attach(&mut self, line: Arc<dyn InterruptLine>) -> HubResult<RawFd> {
        self.check_transition(BridgeState::Configured)?;
        let stop_signal = StopSignal::new()?;
        let fd = line.event_fd().as_raw_fd();

        self.line = Some(line);
        self.stop_signal = Some(Arc::new(stop_signal));
        self.state.transition(BridgeState::Configured)?;
        info!(fd, "Interrupt bridge configured");
        Ok(fd)
    }

    /// Spawn the watcher and return the dispatcher for the calling thread.
    ///
    /// `notifier` is invoked from the watcher thread to schedule
    /// [`Dispatcher::on_wake`] on this thread. `service` runs on this thread
    /// only, once per call while the line is asserted. Each start gets a
    /// fresh queue and pending flag.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidStateTransition`] unless configured or
    /// stopped, or [`HubError::Resource`] if the thread cannot be spawned.
    pub fn start<N, F>(&mut self, notifier: N, service: F) -> HubResult<Dispatcher>
    where
        N: WakeNotifier + 'static,
        F: FnMut() + 'static,
    {
        self.check_transition(BridgeState::Running)?;
        let (Some(line), Some(stop_signal)) = (&self.line, &self.stop_signal) else {
            return Err(HubError::Resource("bridge has no interrupt line".into()));
        };

        let shared = Arc::new(IrqShared::new(
            self.config.queue_capacity,
            Arc::clone(&self.stats),
        ));
        self.burst.end();

        let watcher = EdgeWatcher::spawn(
            Arc::clone(line),
            Arc::clone(stop_signal),
            Arc::clone(&shared),
            Box::new(notifier),
            self.config.watcher.clone(),
        )?;
        let dispatcher = Dispatcher::new(
            shared,
            Arc::downgrade(line),
            Arc::clone(&self.burst),
            self.config.drain_cap,
            Box::new(service),
        );

        self.watcher = Some(watcher);
        self.state.transition(BridgeState::Running)?;
        Ok(dispatcher)
    }

    /// Stop and join the watcher. A no-op unless running.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ThreadingFault`] when called from the watcher
    /// thread, or [`HubError::Resource`] if the stop fd cannot be signalled.
    pub fn stop(&mut self) -> HubResult<()> {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.stop()?;
        }
        self.watcher = None;

        if self.state.state() == BridgeState::Running {
            self.state.transition(BridgeState::Stopped)?;
            debug!("Interrupt bridge stopped");
        }
        Ok(())
    }

    /// Stop if needed, then release the line and stop eventfd.
    ///
    /// Safe to call repeatedly; an idle bridge is left untouched.
    ///
    /// # Errors
    ///
    /// Propagates [`stop`](Self::stop) failures, in which case nothing is
    /// released.
    pub fn teardown(&mut self) -> HubResult<()> {
        self.stop()?;
        if !self.state.state().holds_resources() {
            return Ok(());
        }

        self.line = None;
        self.stop_signal = None;
        self.burst.end();
        self.state.transition(BridgeState::Idle)?;
        info!("Interrupt bridge torn down");
        Ok(())
    }

    /// Timestamp of the burst being serviced, if any.
    #[must_use]
    pub fn current_burst(&self) -> Option<u32> {
        self.burst.get()
    }

    /// Shared handle to the current burst, for the transport's frame timestamps.
    #[must_use]
    pub fn burst_handle(&self) -> Arc<CurrentBurst> {
        Arc::clone(&self.burst)
    }

    /// Sample the line level. False when no line is held or the read fails.
    #[must_use]
    pub fn line_active(&self) -> bool {
        let Some(line) = &self.line else {
            return false;
        };
        match line.is_asserted() {
            Ok(asserted) => asserted,
            Err(e) => {
                warn!(error = %e, "Interrupt level read failed");
                self.stats.record_level_fault();
                false
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state.state()
    }

    /// Whether the watcher thread is alive.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(EdgeWatcher::is_running)
    }

    /// Interrupt path counters, cumulative across restarts.
    #[must_use]
    pub fn stats(&self) -> IrqStatsSnapshot {
        self.stats.snapshot()
    }

    /// Bridge configuration.
    #[must_use]
    pub fn config(&self) -> &InterruptConfig {
        &self.config
    }

    fn check_transition(&self, target: BridgeState) -> HubResult<()> {
        let current = self.state.state();
        if current.can_transition_to(target) {
            Ok(())
        } else {
            Err(HubError::InvalidStateTransition {
                from: current.to_string(),
                to: target.to_string(),
            })
        }
    }
}

impl Drop for InterruptBridge {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            error!(error = %e, "Interrupt bridge teardown failed on drop");
        }
    }
}
