//! Watcher thread scheduling.
//!
//! The edge watcher applies its configured SCHED_FIFO priority and CPU
//! affinity to itself right after it starts. Missing privileges (EPERM) are
//! logged and the watcher runs on the default policy; edges are timestamped
//! by the kernel at IRQ time, so a late wakeup delays dispatch but does not
//! skew timestamps.

#![allow(unsafe_code)]
#![allow(unused_imports)] // Platform-specific code may not use all imports

use hub_common::config::{CpuAffinity, WatcherConfig};
use hub_common::error::{HubError, HubResult};
use tracing::{debug, info, warn};

/// Scheduling actually in effect for the watcher thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherSchedule {
    /// Applied SCHED_FIFO priority.
    pub priority: Option<u8>,
    /// CPUs the thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

/// Apply `config` to the calling thread.
///
/// # Errors
///
/// Returns [`HubError::Config`] for unrecoverable settings such as a CPU
/// index beyond the affinity mask. Privilege failures are not errors.
pub fn apply_watcher_scheduling(config: &WatcherConfig) -> HubResult<WatcherSchedule> {
    let priority = match config.priority {
        Some(priority) => set_fifo_priority(priority)?,
        None => None,
    };
    let cpu_affinity = set_cpu_affinity(&config.cpu_affinity)?;

    let schedule = WatcherSchedule {
        priority,
        cpu_affinity,
    };
    debug!(?schedule, "Watcher scheduling applied");
    Ok(schedule)
}

#[cfg(target_os = "linux")]
fn set_fifo_priority(priority: u8) -> HubResult<Option<u8>> {
    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            original = priority,
            clamped, "Watcher priority clamped to valid range"
        );
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: pid 0 targets the calling thread; `param` is a valid sched_param.
    let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!(
                "sched_setscheduler failed with EPERM - watcher runs without RT priority. \
                 Grant CAP_SYS_NICE or raise RLIMIT_RTPRIO."
            );
            return Ok(None);
        }
        return Err(HubError::Config(format!("sched_setscheduler failed: {err}")));
    }

    info!(priority = clamped, "Watcher running with SCHED_FIFO");
    Ok(Some(clamped))
}

#[cfg(not(target_os = "linux"))]
fn set_fifo_priority(priority: u8) -> HubResult<Option<u8>> {
    warn!(priority, "Real-time scheduling not available on this platform");
    Ok(None)
}

#[cfg(target_os = "linux")]
fn set_cpu_affinity(affinity: &CpuAffinity) -> HubResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = affinity.cpus();
    if cpus.is_empty() {
        return Ok(None);
    }

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| HubError::Config(format!("Invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            info!(?cpus, "Watcher CPU affinity set");
            Ok(Some(cpus))
        }
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "Invalid CPU set - some CPUs may not exist");
            Ok(None)
        }
        Err(e) => Err(HubError::Config(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(affinity: &CpuAffinity) -> HubResult<Option<Vec<usize>>> {
    if !matches!(affinity, CpuAffinity::None) {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_noop() {
        let schedule = apply_watcher_scheduling(&WatcherConfig::default()).unwrap();
        assert_eq!(schedule, WatcherSchedule::default());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_out_of_range_cpu_is_config_error() {
        let config = WatcherConfig {
            priority: None,
            cpu_affinity: CpuAffinity::Single(1 << 20),
        };
        let err = apply_watcher_scheduling(&config).unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }
}
