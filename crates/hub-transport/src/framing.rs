//! SHTP header parsing and the two-phase framed reader.
//!
//! # Header layout
//!
//! ```text
//! byte 0..2  length, little-endian; bit 15 = continuation
//! byte 2     channel
//! byte 3     sequence number
//! ```
//!
//! # Two-phase read
//!
//! The hub's output buffer is re-read from the start on every bus
//! transaction, so a frame is fetched in two polls: the first reads only the
//! header to learn the length, the next reads `length + 4` bytes in one shot.
//! The reader never blocks between the two; the caller's poll loop drives it.

use hub_common::error::{HubError, HubResult};
use std::io::{self, Read};
use tracing::{trace, warn};

/// SHTP header size in bytes.
pub const HEADER_LEN: usize = 4;

/// Continuation flag in the raw length field.
pub const CONTINUATION_BIT: u16 = 0x8000;

/// Mask selecting the length bits of the raw length field.
pub const LENGTH_MASK: u16 = 0x7FFF;

/// Decoded SHTP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShtpHeader {
    /// Declared length with the continuation bit masked off.
    pub length: u16,
    /// Whether this transfer continues an earlier one.
    pub continuation: bool,
    /// SHTP channel.
    pub channel: u8,
    /// Per-channel sequence number.
    pub sequence: u8,
}

impl ShtpHeader {
    /// Decode the first four bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ProtocolFraming`] if fewer than four bytes are given.
    pub fn parse(bytes: &[u8]) -> HubResult<Self> {
        let [lo, hi, channel, sequence, ..] = *bytes else {
            return Err(HubError::ProtocolFraming(format!(
                "header needs {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        };
        let raw = u16::from_le_bytes([lo, hi]);
        Ok(Self {
            length: raw & LENGTH_MASK,
            continuation: raw & CONTINUATION_BIT != 0,
            channel,
            sequence,
        })
    }

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut raw = self.length & LENGTH_MASK;
        if self.continuation {
            raw |= CONTINUATION_BIT;
        }
        let [lo, hi] = raw.to_le_bytes();
        [lo, hi, self.channel, self.sequence]
    }

    /// A zero length means the hub has nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Build a complete SHTP packet (header + payload).
///
/// Payloads too long for the 15-bit length field are truncated.
#[must_use]
pub fn shtp_packet(channel: u8, sequence: u8, payload: &[u8]) -> Vec<u8> {
    let max_payload = usize::from(LENGTH_MASK) - HEADER_LEN;
    let payload = &payload[..payload.len().min(max_payload)];
    let length = u16::try_from(HEADER_LEN + payload.len()).unwrap_or(LENGTH_MASK);

    let header = ShtpHeader {
        length,
        continuation: false,
        channel,
        sequence,
    };
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(payload);
    packet
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ReadPhase {
    #[default]
    Header,
    Payload {
        declared: u16,
    },
}

/// Two-phase frame read state machine.
#[derive(Debug, Clone, Default)]
pub struct FrameReader {
    phase: ReadPhase,
}

impl FrameReader {
    /// Create a reader waiting for a header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one poll.
    ///
    /// Returns `Ok(Some(n))` when a frame of `n` bytes landed in `buf`, and
    /// `Ok(None)` when there is no frame yet: either the header declared zero
    /// length, or a non-zero header was just latched for the next poll.
    ///
    /// # Errors
    ///
    /// - [`HubError::ProtocolFraming`] if `buf` cannot hold a header.
    /// - [`HubError::Transfer`] on a failed or short bus read. A failed
    ///   payload read keeps the latch so the next poll retries it; a short
    ///   one drops it.
    pub fn poll<R>(&mut self, bus: &mut R, buf: &mut [u8]) -> HubResult<Option<usize>>
    where
        R: Read + ?Sized,
    {
        if buf.len() < HEADER_LEN {
            return Err(HubError::ProtocolFraming(format!(
                "read buffer of {} bytes cannot hold a header",
                buf.len()
            )));
        }

        match self.phase {
            ReadPhase::Header => self.read_header(bus, buf),
            ReadPhase::Payload { declared } => self.read_payload(bus, buf, declared),
        }
    }

    fn read_header<R>(&mut self, bus: &mut R, buf: &mut [u8]) -> HubResult<Option<usize>>
    where
        R: Read + ?Sized,
    {
        let n = read_once(bus, &mut buf[..HEADER_LEN])?;
        if n < HEADER_LEN {
            return Err(HubError::Transfer(format!(
                "short header read: {n} of {HEADER_LEN} bytes"
            )));
        }

        let header = ShtpHeader::parse(&buf[..HEADER_LEN])?;
        if header.is_empty() {
            return Ok(None);
        }

        trace!(
            length = header.length,
            channel = header.channel,
            continuation = header.continuation,
            "SHTP header latched"
        );
        self.phase = ReadPhase::Payload {
            declared: header.length,
        };
        Ok(None)
    }

    fn read_payload<R>(
        &mut self,
        bus: &mut R,
        buf: &mut [u8],
        declared: u16,
    ) -> HubResult<Option<usize>>
    where
        R: Read + ?Sized,
    {
        let requested = usize::from(declared) + HEADER_LEN;
        let want = if requested > buf.len() {
            warn!(
                requested,
                buffer = buf.len(),
                "SHTP frame larger than read buffer, truncating"
            );
            buf.len()
        } else {
            requested
        };

        // Failure keeps the latch: the hub still holds the frame.
        let n = read_once(bus, &mut buf[..want])?;
        self.phase = ReadPhase::Header;

        if n < want {
            return Err(HubError::Transfer(format!(
                "short payload read: {n} of {want} bytes"
            )));
        }
        Ok(Some(n))
    }

    /// Whether a header has been latched and the payload read is next.
    #[must_use]
    pub fn is_latched(&self) -> bool {
        matches!(self.phase, ReadPhase::Payload { .. })
    }

    /// Length declared by the latched header.
    #[must_use]
    pub fn pending_length(&self) -> Option<u16> {
        match self.phase {
            ReadPhase::Header => None,
            ReadPhase::Payload { declared } => Some(declared),
        }
    }

    /// Drop any latched header.
    pub fn reset(&mut self) {
        self.phase = ReadPhase::Header;
    }
}

fn read_once<R>(bus: &mut R, buf: &mut [u8]) -> HubResult<usize>
where
    R: Read + ?Sized,
{
    loop {
        match bus.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HubError::Transfer(format!("I2C read failed: {e}"))),
        }
    }
}
