//! I2C session settings and bus connectors.

use hub_common::config::I2cConfig;
use hub_common::error::HubResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;

/// Bus number and peer address of one I2C session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct I2cSettings {
    /// Adapter number N of `/dev/i2c-N`.
    pub bus: u8,
    /// 7-bit peer address.
    pub address: u8,
}

impl I2cSettings {
    /// Create settings for `address` on `bus`.
    #[must_use]
    pub fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }

    /// Character device path for the bus.
    #[must_use]
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/i2c-{}", self.bus))
    }
}

impl Default for I2cSettings {
    fn default() -> Self {
        Self::from(&I2cConfig::default())
    }
}

impl From<&I2cConfig> for I2cSettings {
    fn from(config: &I2cConfig) -> Self {
        Self::new(config.bus, config.address)
    }
}

impl fmt::Display for I2cSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i2c-{}@0x{:02X}", self.bus, self.address)
    }
}

/// Opens a byte stream to one I2C peer.
///
/// Every `read` on the returned bus is one bus read transaction addressed to
/// the peer, every `write` one write transaction. Dropping the bus closes it.
pub trait I2cConnector {
    /// Open session type.
    type Bus: Read + Write;

    /// Open the adapter and select the peer address.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Device`](hub_common::HubError::Device) if the
    /// adapter cannot be opened or the address cannot be selected.
    fn connect(&self, settings: &I2cSettings) -> HubResult<Self::Bus>;
}

#[cfg(target_os = "linux")]
pub use linux::LinuxI2cConnector;

#[cfg(target_os = "linux")]
mod linux {
    #![allow(unsafe_code)]

    use super::{I2cConnector, I2cSettings};
    use hub_common::error::{HubError, HubResult};
    use std::fs::{File, OpenOptions};
    use std::os::fd::AsRawFd;
    use tracing::info;

    nix::ioctl_write_int_bad!(i2c_set_slave_address, 0x0703);

    /// Connector for Linux `i2c-dev` adapters.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LinuxI2cConnector;

    impl I2cConnector for LinuxI2cConnector {
        type Bus = File;

        fn connect(&self, settings: &I2cSettings) -> HubResult<File> {
            let path = settings.device_path();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| {
                    HubError::Device(format!("failed to open {}: {e}", path.display()))
                })?;
            info!(device = %path.display(), "Opened I2C device");

            // SAFETY: I2C_SLAVE takes the address by value; `file` is an open
            // i2c-dev descriptor.
            unsafe { i2c_set_slave_address(file.as_raw_fd(), i32::from(settings.address)) }
                .map_err(|e| {
                    HubError::Device(format!(
                        "failed to select I2C address 0x{:02X}: {e}",
                        settings.address
                    ))
                })?;
            info!(address = settings.address, "Set I2C peer address");

            Ok(file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path_and_display() {
        let settings = I2cSettings::new(3, 0x4B);
        assert_eq!(settings.device_path(), PathBuf::from("/dev/i2c-3"));
        assert_eq!(settings.to_string(), "i2c-3@0x4B");
    }

    #[test]
    fn test_defaults_follow_config() {
        let settings = I2cSettings::default();
        assert_eq!(settings.bus, 1);
        assert_eq!(settings.address, 0x4A);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_missing_adapter_is_device_error() {
        let err = LinuxI2cConnector
            .connect(&I2cSettings::new(250, 0x4A))
            .unwrap_err();
        assert!(matches!(err, hub_common::HubError::Device(_)));
    }
}
