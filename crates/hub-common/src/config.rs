//! Configuration structures for the sensor hub bridge.
//!
//! Supports TOML deserialization with defaults matching a BNO08x wired to
//! a Raspberry Pi header (I2C bus 1, address 0x4A, INT on a gpiochip0 line).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default timestamp queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 600;

/// Default iteration cap for one burst drain.
pub const DEFAULT_DRAIN_CAP: u32 = 20_000;

/// Default BNO08x I2C address (SA0 high).
pub const DEFAULT_I2C_ADDRESS: u8 = 0x4A;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interrupt line and consumer dispatch configuration.
    pub interrupt: InterruptConfig,

    /// I2C transport configuration.
    pub i2c: I2cConfig,

    /// Reference daemon loop configuration.
    pub daemon: DaemonConfig,
}

/// Interrupt line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    /// GPIO chip, either a path ("/dev/gpiochip0") or a bare name ("gpiochip0").
    pub chip: String,

    /// Line offset of the INT pin on the chip.
    pub line_offset: u32,

    /// Capacity of the edge timestamp queue.
    pub queue_capacity: usize,

    /// Maximum service callback invocations per burst.
    pub drain_cap: u32,

    /// Consumer label prefix reported to the kernel for the line request.
    pub consumer_label: String,

    /// Watcher thread scheduling.
    pub watcher: WatcherConfig,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            chip: String::from("gpiochip0"),
            line_offset: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_cap: DEFAULT_DRAIN_CAP,
            consumer_label: String::from("hub-irq"),
            watcher: WatcherConfig::default(),
        }
    }
}

impl InterruptConfig {
    /// Resolve the chip identifier to a device path.
    ///
    /// Bare names are looked up under `/dev/`.
    #[must_use]
    pub fn chip_path(&self) -> PathBuf {
        resolve_chip_path(&self.chip)
    }
}

/// Resolve a GPIO chip identifier ("gpiochip0" or "/dev/gpiochip0") to a path.
#[must_use]
pub fn resolve_chip_path(chip: &str) -> PathBuf {
    if chip.contains('/') {
        PathBuf::from(chip)
    } else {
        PathBuf::from("/dev").join(chip)
    }
}

/// Scheduling applied by the watcher thread to itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// SCHED_FIFO priority (1-99). `None` keeps the default policy.
    pub priority: Option<u8>,

    /// CPU affinity for the watcher thread.
    pub cpu_affinity: CpuAffinity,
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl CpuAffinity {
    /// CPUs named by this affinity, empty when unset.
    #[must_use]
    pub fn cpus(&self) -> Vec<usize> {
        match self {
            CpuAffinity::None => Vec::new(),
            CpuAffinity::Single(cpu) => vec![*cpu],
            CpuAffinity::Set(cpus) => cpus.clone(),
        }
    }
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(de::Error::custom("CPU index cannot be negative"));
                }
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

/// I2C transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct I2cConfig {
    /// Bus number N of `/dev/i2c-N`.
    pub bus: u8,

    /// 7-bit peer address.
    pub address: u8,

    /// Time granted to the hub after the reset frame on open.
    #[serde(with = "humantime_serde")]
    pub reset_settle: Duration,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            bus: 1,
            address: DEFAULT_I2C_ADDRESS,
            reset_settle: Duration::from_secs(1),
        }
    }
}

/// Reference daemon loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Interval between statistics log lines.
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,

    /// Upper bound on one wait for a wake before re-checking shutdown.
    #[serde(with = "humantime_serde")]
    pub wake_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(10),
            wake_timeout: Duration::from_millis(100),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interrupt.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "interrupt.queue_capacity must be at least 1".into(),
            ));
        }
        if self.interrupt.drain_cap == 0 {
            return Err(ConfigError::Invalid(
                "interrupt.drain_cap must be at least 1".into(),
            ));
        }
        if self.i2c.address > 0x7F {
            return Err(ConfigError::Invalid(format!(
                "i2c.address 0x{:02X} is not a 7-bit address",
                self.i2c.address
            )));
        }
        if let Some(priority) = self.interrupt.watcher.priority {
            if !(1..=99).contains(&priority) {
                return Err(ConfigError::Invalid(format!(
                    "interrupt.watcher.priority {priority} outside 1-99"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
