//! I2C implementation of the sensor hub HAL.

use crate::framing::FrameReader;
use crate::i2c::{I2cConnector, I2cSettings};
use crate::{Frame, ShtpHal, RESET_FRAME};
use hub_common::config::I2cConfig;
use hub_common::error::{HubError, HubResult};
use hub_common::time::{ClockSource, CurrentBurst, MonotonicClock};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sensor hub HAL over one I2C session.
///
/// Holds at most one open session. Reconfiguring closes it first; frames are
/// stamped with the current burst's trigger time when one is active.
pub struct I2cHal<C: I2cConnector> {
    connector: C,
    settings: I2cSettings,
    reset_settle: Duration,
    session: Option<C::Bus>,
    reader: FrameReader,
    burst: Arc<CurrentBurst>,
    clock: Arc<dyn ClockSource>,
}

impl<C: I2cConnector> fmt::Debug for I2cHal<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2cHal")
            .field("settings", &self.settings)
            .field("open", &self.session.is_some())
            .field("reader", &self.reader)
            .finish_non_exhaustive()
    }
}

/// HAL backed by Linux `i2c-dev`.
#[cfg(target_os = "linux")]
pub type LinuxI2cHal = I2cHal<crate::i2c::LinuxI2cConnector>;

#[cfg(target_os = "linux")]
impl I2cHal<crate::i2c::LinuxI2cConnector> {
    /// Build a Linux HAL from configuration.
    #[must_use]
    pub fn from_config(config: &I2cConfig, burst: Arc<CurrentBurst>) -> Self {
        Self::new(crate::i2c::LinuxI2cConnector, I2cSettings::from(config), burst)
            .with_reset_settle(config.reset_settle)
    }
}

impl<C: I2cConnector> I2cHal<C> {
    /// Create a closed HAL.
    pub fn new(connector: C, settings: I2cSettings, burst: Arc<CurrentBurst>) -> Self {
        Self {
            connector,
            settings,
            reset_settle: I2cConfig::default().reset_settle,
            session: None,
            reader: FrameReader::new(),
            burst,
            clock: Arc::new(MonotonicClock),
        }
    }

    /// Time granted to the hub after the reset frame.
    #[must_use]
    pub fn with_reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle = settle;
        self
    }

    /// Replace the fallback clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the session settings, closing any open session first.
    pub fn configure(&mut self, settings: I2cSettings) {
        if self.session.is_some() {
            self.close();
        }
        debug!(%settings, "I2C settings updated");
        self.settings = settings;
    }

    /// Current session settings.
    #[must_use]
    pub fn settings(&self) -> I2cSettings {
        self.settings
    }

    /// Whether a session is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Whether a header is latched and the payload read is next.
    #[must_use]
    pub fn read_pending(&self) -> bool {
        self.reader.is_latched()
    }

    fn send_reset(bus: &mut C::Bus) -> HubResult<()> {
        match bus.write(&RESET_FRAME) {
            Ok(n) if n == RESET_FRAME.len() => Ok(()),
            Ok(n) => Err(HubError::Transfer(format!(
                "reset frame: wrote {n} of {} bytes",
                RESET_FRAME.len()
            ))),
            Err(e) => Err(HubError::Transfer(format!("reset frame write failed: {e}"))),
        }
    }
}

impl<C: I2cConnector> ShtpHal for I2cHal<C> {
    fn open(&mut self) -> HubResult<()> {
        if self.session.is_some() {
            debug!(settings = %self.settings, "I2C device already open");
            return Ok(());
        }

        let mut bus = self.connector.connect(&self.settings)?;
        // A failed reset drops `bus`, closing the descriptor.
        Self::send_reset(&mut bus)?;
        info!(settings = %self.settings, "Reset sent to sensor hub");

        if !self.reset_settle.is_zero() {
            thread::sleep(self.reset_settle);
        }

        self.reader.reset();
        self.session = Some(bus);
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut bus) = self.session.take() else {
            debug!("I2C device is not open");
            return;
        };

        if let Err(e) = Self::send_reset(&mut bus) {
            warn!(error = %e, "Sensor hub could not be reset on close");
        }
        drop(bus);
        self.reader.reset();
        info!(settings = %self.settings, "Closed I2C device");
    }

    fn read(&mut self, buf: &mut [u8]) -> Option<Frame> {
        let bus = self.session.as_mut()?;
        match self.reader.poll(bus, buf) {
            Ok(Some(len)) => Some(Frame {
                len,
                timestamp_us: self.burst.timestamp_or(self.clock.as_ref()),
            }),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "SHTP read yielded no frame");
                None
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let Some(bus) = self.session.as_mut() else {
            return 0;
        };
        match bus.write(buf) {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, len = buf.len(), "I2C write not accepted");
                0
            }
        }
    }

    fn time_us(&self) -> u32 {
        self.clock.now_us()
    }
}

impl<C: I2cConnector> Drop for I2cHal<C> {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.close();
        }
    }
}
