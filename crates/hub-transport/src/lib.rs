//! Framed transport between the host and a sensor hub.
//!
//! This crate provides:
//! - [`ShtpHal`] trait, the table the hub protocol driver calls into
//! - [`framing`] module with SHTP header parsing and the two-phase reader
//! - [`i2c`] module with session settings and the Linux `i2c-dev` connector
//! - [`hal`] module with the I2C implementation of [`ShtpHal`]
//! - [`simulated`] module with an in-memory hub (feature `simulated`)

pub mod framing;
pub mod hal;
pub mod i2c;
#[cfg(feature = "simulated")]
pub mod simulated;

pub use framing::*;
pub use hal::*;
pub use i2c::*;
#[cfg(feature = "simulated")]
pub use simulated::*;

use hub_common::HubResult;

/// Reset command: length 5, channel 1 (executable), sequence 0, payload 1 (reset).
pub const RESET_FRAME: [u8; 5] = [0x05, 0x00, 0x01, 0x00, 0x01];

/// A frame delivered by [`ShtpHal::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Bytes written to the caller's buffer.
    pub len: usize,
    /// Trigger time of the interrupt burst, or read time outside a burst.
    pub timestamp_us: u32,
}

/// Hardware abstraction the hub protocol driver polls.
///
/// None of these calls block waiting for the hub. `read` and `write` report
/// "nothing now" as `None`/`0`; the driver simply polls again.
pub trait ShtpHal {
    /// Open the bus and reset the hub. A no-op if already open.
    ///
    /// # Errors
    ///
    /// [`HubError::Device`](hub_common::HubError::Device) if the bus or
    /// address cannot be opened, [`HubError::Transfer`](hub_common::HubError::Transfer)
    /// if the reset frame is not fully written.
    fn open(&mut self) -> HubResult<()>;

    /// Reset the hub and release the bus. Reset failures are only logged.
    fn close(&mut self);

    /// Advance the framed read; `Some` once a whole frame is in `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Option<Frame>;

    /// Best-effort write. Returns bytes accepted; 0 means try again later.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Wrapping microsecond clock.
    fn time_us(&self) -> u32;
}
