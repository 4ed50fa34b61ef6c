//! Sensor hub bridge daemon.
//!
//! Reference embedding of the interrupt bridge: requests the INT line, opens
//! the I2C HAL, and runs a single-threaded wake loop in which every service
//! call polls the HAL once for a frame.

mod signals;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;
use hub_common::config::BridgeConfig;
use hub_irq::{wake_channel, InterruptBridge, InterruptLine, WaitResult};
use hub_transport::{I2cConnector, I2cHal, I2cSettings, ShtpHal};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::signals::SignalHandler;
use crate::simulate::SimulatedHardware;

/// Largest frame the daemon accepts in one read.
const READ_BUFFER_LEN: usize = 1024;

/// Interrupt period of the simulated hub.
const SIM_PERIOD: Duration = Duration::from_millis(10);

/// Sensor hub bridge command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "hub-daemon",
    about = "Sensor hub bridge daemon - interrupt-driven SHTP frame reader",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// GPIO chip path or name (overrides config file).
    #[arg(long)]
    chip: Option<String>,

    /// INT line offset on the chip (overrides config file).
    #[arg(long)]
    line: Option<u32>,

    /// I2C bus number (overrides config file).
    #[arg(long)]
    bus: Option<u8>,

    /// I2C peer address, decimal or 0x-prefixed hex (overrides config file).
    #[arg(long, value_parser = parse_address)]
    address: Option<u8>,

    /// Run against a simulated line and hub (no hardware).
    #[arg(long, short = 's')]
    simulate: bool,

    /// Stop after this many frames (0 = run until signalled).
    #[arg(long, default_value = "0")]
    max_frames: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn parse_address(value: &str) -> Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address {value:?}: {e}"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sensor hub bridge");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        chip = %config.interrupt.chip,
        line = config.interrupt.line_offset,
        bus = config.i2c.bus,
        address = config.i2c.address,
        simulate = args.simulate,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let summary = if args.simulate {
        run_simulated(&config, &signal_handler, args.max_frames)?
    } else {
        run_hardware(&config, &signal_handler, args.max_frames)?
    };

    info!(
        frames = summary.frames,
        uptime_secs = summary.uptime.as_secs(),
        signals = signal_handler.signal_count(),
        "Daemon shutdown complete"
    );
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "hub_daemon={level},hub_irq={level},hub_transport={level},hub_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `HUB_CONFIG_PATH` environment variable
/// 3. `/etc/hub-bridge/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<BridgeConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return BridgeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("HUB_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from HUB_CONFIG_PATH");
            return BridgeConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from HUB_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "HUB_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/hub-bridge/config.toml", "config/default.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(?path, "Loading config file");
            return BridgeConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(BridgeConfig::default())
}

fn apply_overrides(config: &mut BridgeConfig, args: &Args) {
    if let Some(chip) = &args.chip {
        config.interrupt.chip.clone_from(chip);
    }
    if let Some(line) = args.line {
        config.interrupt.line_offset = line;
    }
    if let Some(bus) = args.bus {
        config.i2c.bus = bus;
    }
    if let Some(address) = args.address {
        config.i2c.address = address;
    }
}

/// Totals reported at shutdown.
#[derive(Debug, Clone, Copy)]
struct RunSummary {
    frames: u64,
    uptime: Duration,
}

#[cfg(target_os = "linux")]
fn run_hardware(
    config: &BridgeConfig,
    signal_handler: &SignalHandler,
    max_frames: u64,
) -> Result<RunSummary> {
    let mut bridge = InterruptBridge::new(config.interrupt.clone());
    let fd = bridge
        .setup_from_config()
        .context("Failed to request interrupt line")?;
    debug!(fd, "Interrupt line ready");

    let mut hal = I2cHal::from_config(&config.i2c, bridge.burst_handle());
    hal.open().context("Failed to open sensor hub")?;

    run_bridge(config, &mut bridge, hal, signal_handler, max_frames, || {})
}

#[cfg(not(target_os = "linux"))]
fn run_hardware(_: &BridgeConfig, _: &SignalHandler, _: u64) -> Result<RunSummary> {
    anyhow::bail!("GPIO and I2C access require Linux; use --simulate")
}

fn run_simulated(
    config: &BridgeConfig,
    signal_handler: &SignalHandler,
    max_frames: u64,
) -> Result<RunSummary> {
    info!("Running against simulated hardware");
    let mut hardware = SimulatedHardware::new().context("Failed to create simulated line")?;

    let mut bridge = InterruptBridge::new(config.interrupt.clone());
    bridge
        .attach(Arc::clone(&hardware.line) as Arc<dyn InterruptLine>)
        .context("Failed to attach simulated line")?;

    let mut hal = I2cHal::new(
        hardware.hub.clone(),
        I2cSettings::from(&config.i2c),
        bridge.burst_handle(),
    )
    .with_reset_settle(Duration::ZERO);
    hal.open().context("Failed to open simulated hub")?;

    hardware
        .start(SIM_PERIOD)
        .context("Failed to start simulated hub")?;

    let settle = hardware.settler();
    let summary = run_bridge(config, &mut bridge, hal, signal_handler, max_frames, settle);
    hardware.stop();
    summary
}

/// Run the wake loop until shutdown, then stop, tear down, and close.
///
/// `after_poll` runs after every service poll on the loop thread.
fn run_bridge<C, P>(
    config: &BridgeConfig,
    bridge: &mut InterruptBridge,
    hal: I2cHal<C>,
    signal_handler: &SignalHandler,
    max_frames: u64,
    after_poll: P,
) -> Result<RunSummary>
where
    C: I2cConnector + 'static,
    C::Bus: 'static,
    P: Fn() + 'static,
{
    let started = Instant::now();
    let hal = Rc::new(RefCell::new(hal));
    let frames = Rc::new(Cell::new(0u64));

    let service = {
        let hal = Rc::clone(&hal);
        let frames = Rc::clone(&frames);
        let mut buf = vec![0u8; READ_BUFFER_LEN];
        move || {
            if let Some(frame) = hal.borrow_mut().read(&mut buf) {
                frames.set(frames.get() + 1);
                trace!(
                    len = frame.len,
                    timestamp_us = frame.timestamp_us,
                    channel = buf[2],
                    "Frame received"
                );
            }
            after_poll();
        }
    };

    let (tx, rx) = wake_channel();
    let mut dispatcher = bridge
        .start(tx, service)
        .context("Failed to start interrupt bridge")?;
    info!(state = %bridge.state(), "Bridge running, entering wake loop");

    let mut last_stats = Instant::now();
    loop {
        if signal_handler.shutdown_requested() {
            info!("Shutdown signal received, stopping bridge");
            break;
        }

        match rx.wait(config.daemon.wake_timeout) {
            WaitResult::Wake => {
                let outcome = dispatcher.on_wake();
                trace!(?outcome, "Wake serviced");
            }
            WaitResult::Timeout => {}
            WaitResult::Disconnected => {
                error!("Edge watcher exited, stopping bridge");
                break;
            }
        }

        if max_frames > 0 && frames.get() >= max_frames {
            info!(frames = frames.get(), "Maximum frame count reached");
            break;
        }

        if signal_handler.take_stats_request()
            || last_stats.elapsed() >= config.daemon.stats_interval
        {
            log_stats(bridge, frames.get());
            last_stats = Instant::now();
        }
    }

    info!("Shutting down...");
    let stop_result = bridge.stop().context("Failed to stop edge watcher");
    drop(dispatcher);
    if let Err(e) = bridge.teardown() {
        warn!(error = %e, "Interrupt bridge teardown failed");
    }
    hal.borrow_mut().close();
    log_stats(bridge, frames.get());
    stop_result?;

    Ok(RunSummary {
        frames: frames.get(),
        uptime: started.elapsed(),
    })
}

fn log_stats(bridge: &InterruptBridge, frames: u64) {
    let snapshot = bridge.stats();
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(frames, stats = %json, "Interrupt statistics"),
        Err(e) => warn!(error = %e, "Failed to serialize statistics"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["hub-daemon", "--simulate", "--max-frames", "10"]);
        assert!(args.simulate);
        assert_eq!(args.max_frames, 10);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_address_accepts_hex_and_decimal() {
        let args = Args::parse_from(["hub-daemon", "--address", "0x4B", "--bus", "3"]);
        assert_eq!(args.address, Some(0x4B));
        assert_eq!(args.bus, Some(3));

        assert_eq!(parse_address("74"), Ok(74));
        assert!(parse_address("0x1FF").is_err());
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let args = Args::parse_from([
            "hub-daemon",
            "--chip",
            "/dev/gpiochip4",
            "--line",
            "17",
        ]);
        let mut config = BridgeConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.interrupt.chip, "/dev/gpiochip4");
        assert_eq!(config.interrupt.line_offset, 17);
        assert_eq!(config.i2c.bus, 1);
    }

    #[test]
    fn test_config_flag_loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "[interrupt]\nline_offset = 23\n").unwrap();

        let args = Args::parse_from(["hub-daemon", "-c", path.to_str().unwrap()]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.interrupt.line_offset, 23);
    }

    #[test]
    fn test_simulated_run_reaches_frame_limit() {
        let signal_handler = SignalHandler::new().unwrap();
        let summary = run_simulated(&BridgeConfig::default(), &signal_handler, 6).unwrap();
        assert!(summary.frames >= 6);
    }
}
