//! GPIO character device line (Linux uAPI v2).
//!
//! Requests one line as a pulled-up input with falling-edge detection. The
//! returned line request fd is what the watcher polls; edge events carry a
//! CLOCK_MONOTONIC nanosecond timestamp captured by the kernel at IRQ time.

#![allow(unsafe_code)]

use crate::line::InterruptLine;
use hub_common::error::{HubError, HubResult};
use hub_common::time::ns_to_us32;
use static_assertions::const_assert_eq;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const GPIO_V2_LINES_MAX: usize = 64;
const GPIO_V2_LINE_NUM_ATTRS_MAX: usize = 10;
const GPIO_MAX_NAME_SIZE: usize = 32;

const GPIO_V2_LINE_FLAG_INPUT: u64 = 1 << 2;
const GPIO_V2_LINE_FLAG_EDGE_FALLING: u64 = 1 << 5;
const GPIO_V2_LINE_FLAG_BIAS_PULL_UP: u64 = 1 << 8;

const GPIO_V2_LINE_EVENT_FALLING_EDGE: u32 = 2;

/// Edge events fetched per read.
const EVENT_BATCH: usize = 16;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct GpioV2LineAttribute {
    id: u32,
    padding: u32,
    value: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct GpioV2LineConfigAttribute {
    attr: GpioV2LineAttribute,
    mask: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct GpioV2LineConfig {
    flags: u64,
    num_attrs: u32,
    padding: [u32; 5],
    attrs: [GpioV2LineConfigAttribute; GPIO_V2_LINE_NUM_ATTRS_MAX],
}

#[repr(C)]
struct GpioV2LineRequest {
    offsets: [u32; GPIO_V2_LINES_MAX],
    consumer: [u8; GPIO_MAX_NAME_SIZE],
    config: GpioV2LineConfig,
    num_lines: u32,
    event_buffer_size: u32,
    padding: [u32; 5],
    fd: i32,
}

#[repr(C)]
#[derive(Default)]
struct GpioV2LineValues {
    bits: u64,
    mask: u64,
}

const EVENT_SIZE: usize = 48;

const_assert_eq!(size_of::<GpioV2LineAttribute>(), 16);
const_assert_eq!(size_of::<GpioV2LineConfigAttribute>(), 24);
const_assert_eq!(size_of::<GpioV2LineConfig>(), 272);
const_assert_eq!(size_of::<GpioV2LineRequest>(), 592);
const_assert_eq!(size_of::<GpioV2LineValues>(), 16);

nix::ioctl_readwrite!(gpio_v2_get_line, 0xB4, 0x07, GpioV2LineRequest);
nix::ioctl_readwrite!(gpio_v2_line_get_values, 0xB4, 0x0E, GpioV2LineValues);

impl GpioV2LineRequest {
    fn falling_edge_input(offset: u32, consumer: &str) -> Self {
        let mut offsets = [0u32; GPIO_V2_LINES_MAX];
        offsets[0] = offset;

        Self {
            offsets,
            consumer: consumer_label(consumer),
            config: GpioV2LineConfig {
                flags: GPIO_V2_LINE_FLAG_INPUT
                    | GPIO_V2_LINE_FLAG_EDGE_FALLING
                    | GPIO_V2_LINE_FLAG_BIAS_PULL_UP,
                ..GpioV2LineConfig::default()
            },
            num_lines: 1,
            event_buffer_size: 0,
            padding: [0; 5],
            fd: -1,
        }
    }
}

/// NUL-terminated, truncated copy of `label`.
fn consumer_label(label: &str) -> [u8; GPIO_MAX_NAME_SIZE] {
    let mut out = [0u8; GPIO_MAX_NAME_SIZE];
    let bytes = label.as_bytes();
    let len = bytes.len().min(GPIO_MAX_NAME_SIZE - 1);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn ne_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_ne_bytes(raw)
}

fn ne_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_ne_bytes(raw)
}

/// Extract the kernel timestamp of a falling-edge event record.
fn falling_edge_timestamp(record: &[u8]) -> Option<u64> {
    (ne_u32(&record[8..12]) == GPIO_V2_LINE_EVENT_FALLING_EDGE).then(|| ne_u64(&record[0..8]))
}

/// A requested GPIO line configured for falling-edge interrupts.
#[derive(Debug)]
pub struct GpioLine {
    request: File,
    // Held for the lifetime of the request so teardown releases both.
    _chip: File,
    path: PathBuf,
    offset: u32,
}

impl GpioLine {
    /// Open `chip_path` and request `offset` as an edge-detecting input.
    ///
    /// The kernel consumer label becomes `"<label>:<pid>"`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Resource`] if the chip cannot be opened or the line
    /// request is refused (busy, bad offset, no edge support). Anything
    /// acquired before the failure is closed on return.
    pub fn open(chip_path: &Path, offset: u32, label: &str) -> HubResult<Self> {
        let chip = OpenOptions::new()
            .read(true)
            .write(true)
            .open(chip_path)
            .map_err(|e| {
                HubError::Resource(format!("failed to open {}: {e}", chip_path.display()))
            })?;

        let consumer = format!("{label}:{}", std::process::id());
        let mut request = GpioV2LineRequest::falling_edge_input(offset, &consumer);

        // SAFETY: `request` is a correctly sized repr(C) uAPI struct that
        // outlives the call, and `chip` is an open gpiochip descriptor.
        unsafe { gpio_v2_get_line(chip.as_raw_fd(), &mut request) }.map_err(|e| {
            HubError::Resource(format!(
                "line request for {}:{offset} failed: {e}",
                chip_path.display()
            ))
        })?;

        if request.fd < 0 {
            return Err(HubError::Resource(format!(
                "line request for {}:{offset} returned no descriptor",
                chip_path.display()
            )));
        }

        // SAFETY: the kernel just handed us ownership of this descriptor.
        let request_fd = unsafe { OwnedFd::from_raw_fd(request.fd) };

        info!(
            chip = %chip_path.display(),
            offset,
            consumer = %consumer,
            fd = request_fd.as_raw_fd(),
            "GPIO interrupt line requested"
        );

        Ok(Self {
            request: File::from(request_fd),
            _chip: chip,
            path: chip_path.to_path_buf(),
            offset,
        })
    }

    /// Chip device path.
    #[must_use]
    pub fn chip_path(&self) -> &Path {
        &self.path
    }

    /// Line offset on the chip.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl InterruptLine for GpioLine {
    fn event_fd(&self) -> BorrowedFd<'_> {
        self.request.as_fd()
    }

    fn read_edges(&self, sink: &mut dyn FnMut(u32)) -> io::Result<usize> {
        let mut buf = [0u8; EVENT_SIZE * EVENT_BATCH];
        let n = match (&self.request).read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut delivered = 0;
        for record in buf[..n].chunks_exact(EVENT_SIZE) {
            if let Some(ns) = falling_edge_timestamp(record) {
                sink(ns_to_us32(ns));
                delivered += 1;
            }
        }
        if n % EVENT_SIZE != 0 {
            debug!(bytes = n, "Ignoring partial GPIO event record");
        }
        Ok(delivered)
    }

    fn is_asserted(&self) -> io::Result<bool> {
        let mut values = GpioV2LineValues { bits: 0, mask: 1 };
        // SAFETY: `values` is a correctly sized repr(C) uAPI struct and the
        // request fd stays open for the duration of the call.
        unsafe { gpio_v2_line_get_values(self.request.as_raw_fd(), &mut values) }
            .map_err(io::Error::from)?;
        // Active-low: electrically low means the hub is asserting INT.
        Ok(values.bits & 1 == 0)
    }
}
