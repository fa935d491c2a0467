//! # Nibble Link Wire Format
//!
//! Fixed-size frames built from ASCII control characters used as structural
//! delimiters. Every frame is `HEADER_SIZE + payload_size` bytes long.
//!
//! ```text
//!  off  len  field
//! +----+----+---------------------------------------------+
//! |  0 |  1 | SOH 0x01                                    |
//! |  1 |  4 | sequence number (u32 BE, 0xFFFFFFFF = none) |
//! |  5 |  1 | ack type: ACK 0x06 / NAK 0x15               |
//! |  6 |  4 | acknowledged sequence (u32 BE)              |
//! | 10 |  2 | sync check: SYN SYN                         |
//! | 12 |  2 | checksum (u16 BE, wrapping payload sum)     |
//! | 14 |  1 | STX 0x02                                    |
//! | 15 |  P | payload                                     |
//! | .. |  1 | ETX 0x03                                    |
//! +----+----+---------------------------------------------+
//! ```
//!
//! The end-of-transmission frame has the same length and is filled with EOT
//! bytes between a leading SOH and a trailing ETX.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Start of heading.
pub const SOH: u8 = 0x01;
/// Start of text (payload marker).
pub const STX: u8 = 0x02;
/// End of text (frame trailer).
pub const ETX: u8 = 0x03;
/// End of transmission.
pub const EOT: u8 = 0x04;
/// Acknowledge.
pub const ACK: u8 = 0x06;
/// Negative acknowledge.
pub const NAK: u8 = 0x15;
/// Synchronous idle.
pub const SYN: u8 = 0x16;

/// Header plus trailer overhead per frame. The payload starts one byte before
/// this offset because the trailer byte is counted here too.
pub const HEADER_SIZE: usize = 16;

/// Offset of the first payload byte.
pub const PAYLOAD_OFFSET: usize = HEADER_SIZE - 1;

/// Default payload bytes per frame.
pub const DEFAULT_PAYLOAD_SIZE: usize = 256;

/// Bytes between two resynchronization beacons.
pub const BYTE_BETWEEN_SYNC: usize = 4;

/// Sequence number that never names a real package.
pub const SENTINEL_SEQUENCE: u32 = u32::MAX;

/// Total frame length for a given payload size.
#[inline]
pub const fn frame_len(payload_size: usize) -> usize {
    HEADER_SIZE + payload_size
}

// ─── Checksum ────────────────────────────────────────────────────────────────

/// 16-bit wrapping sum of the payload bytes (no carry folding).
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

// ─── Probes ──────────────────────────────────────────────────────────────────

/// Handshake probes exchanged while the link is not established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Four SYN bytes: "I am here but cannot hear you yet".
    SyncIdle,
    /// Four ACK bytes: "I can hear you".
    Ack,
}

impl Probe {
    /// Marker byte repeated to form the probe.
    pub fn marker(self) -> u8 {
        match self {
            Probe::SyncIdle => SYN,
            Probe::Ack => ACK,
        }
    }

    /// Wire bytes of one probe group.
    pub fn bytes(self) -> [u8; BYTE_BETWEEN_SYNC] {
        [self.marker(); BYTE_BETWEEN_SYNC]
    }
}

// ─── Acknowledgement Field ───────────────────────────────────────────────────

/// The ack-type / acknowledged-sequence pair carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Positive acknowledgement. `Ack(SENTINEL_SEQUENCE)` acknowledges nothing.
    Ack(u32),
    /// Negative acknowledgement: the payload for this sequence failed its checksum.
    Nak(u32),
}

impl Acknowledgement {
    /// The "nothing to acknowledge" value.
    pub const NONE: Acknowledgement = Acknowledgement::Ack(SENTINEL_SEQUENCE);

    fn type_byte(self) -> u8 {
        match self {
            Acknowledgement::Ack(_) => ACK,
            Acknowledgement::Nak(_) => NAK,
        }
    }

    /// Sequence number carried in the acknowledged field.
    pub fn sequence(self) -> u32 {
        match self {
            Acknowledgement::Ack(s) | Acknowledgement::Nak(s) => s,
        }
    }
}

// ─── Frame ───────────────────────────────────────────────────────────────────

/// A single frame on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Package index, or [`SENTINEL_SEQUENCE`] for keep-alive frames.
    pub sequence: u32,
    /// Piggybacked acknowledgement.
    pub ack: Acknowledgement,
    /// Checksum as carried on the wire.
    pub checksum: u16,
    /// Payload bytes, exactly `payload_size` long.
    pub payload: Bytes,
}

impl Frame {
    /// Build a data frame, computing the checksum over `payload`.
    pub fn data(sequence: u32, ack: Acknowledgement, payload: Bytes) -> Self {
        Frame {
            sequence,
            ack,
            checksum: checksum(&payload),
            payload,
        }
    }

    /// Build a keep-alive frame: sentinel sequence, all-zero payload.
    pub fn keepalive(ack: Acknowledgement, payload_size: usize) -> Self {
        Frame {
            sequence: SENTINEL_SEQUENCE,
            ack,
            checksum: 0,
            payload: Bytes::from(vec![0u8; payload_size]),
        }
    }

    /// Whether this frame carries no package.
    pub fn is_keepalive(&self) -> bool {
        self.sequence == SENTINEL_SEQUENCE
    }

    /// Whether the carried checksum matches the payload.
    pub fn checksum_matches(&self) -> bool {
        checksum(&self.payload) == self.checksum
    }

    /// Serialized length.
    pub fn encoded_len(&self) -> usize {
        frame_len(self.payload.len())
    }

    /// Serialize into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(SOH);
        buf.put_u32(self.sequence);
        buf.put_u8(self.ack.type_byte());
        buf.put_u32(self.ack.sequence());
        buf.put_u8(SYN);
        buf.put_u8(SYN);
        buf.put_u16(self.checksum);
        buf.put_u8(STX);
        buf.put_slice(&self.payload);
        buf.put_u8(ETX);
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("ack", &self.ack)
            .field("checksum", &format_args!("{:#06x}", self.checksum))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// The end-of-transmission frame for a given payload size.
pub fn eot_frame(payload_size: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame_len(payload_size));
    buf.put_u8(SOH);
    buf.put_bytes(EOT, frame_len(payload_size) - 2);
    buf.put_u8(ETX);
    buf.freeze()
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// Structural validation failures. Checksum mismatches are not structural:
/// they are reported through [`Frame::checksum_matches`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame length {actual}, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("bad start marker {0:#04x}")]
    BadStartMarker(u8),
    #[error("bad ack type {0:#04x}")]
    BadAckType(u8),
    #[error("bad sync check {0:#04x} {1:#04x}")]
    BadSyncCheck(u8, u8),
    #[error("bad payload marker {0:#04x}")]
    BadPayloadMarker(u8),
    #[error("bad end marker {0:#04x}")]
    BadEndMarker(u8),
}

/// What a complete frame-sized buffer turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// The peer has nothing further to send.
    EndOfTransmission,
    /// A structurally valid frame (checksum not yet verified).
    Frame(Frame),
}

/// Whether `raw` is exactly the end-of-transmission pattern.
pub fn is_eot(raw: &[u8]) -> bool {
    raw.len() > 2
        && raw[0] == SOH
        && raw[raw.len() - 1] == ETX
        && raw[1..raw.len() - 1].iter().all(|&b| b == EOT)
}

/// Validate and parse one frame-sized buffer.
pub fn decode(raw: &[u8], payload_size: usize) -> Result<Incoming, FrameError> {
    let expected = frame_len(payload_size);
    if raw.len() != expected {
        return Err(FrameError::WrongLength {
            expected,
            actual: raw.len(),
        });
    }
    if is_eot(raw) {
        return Ok(Incoming::EndOfTransmission);
    }

    let mut buf = raw;
    let soh = buf.get_u8();
    if soh != SOH {
        return Err(FrameError::BadStartMarker(soh));
    }
    let sequence = buf.get_u32();
    let ack_type = buf.get_u8();
    let acknowledged = buf.get_u32();
    let ack = match ack_type {
        ACK => Acknowledgement::Ack(acknowledged),
        NAK => Acknowledgement::Nak(acknowledged),
        other => return Err(FrameError::BadAckType(other)),
    };
    let (s0, s1) = (buf.get_u8(), buf.get_u8());
    if s0 != SYN || s1 != SYN {
        return Err(FrameError::BadSyncCheck(s0, s1));
    }
    let checksum = buf.get_u16();
    let stx = buf.get_u8();
    if stx != STX {
        return Err(FrameError::BadPayloadMarker(stx));
    }
    let payload = Bytes::copy_from_slice(&buf[..payload_size]);
    buf.advance(payload_size);
    let etx = buf.get_u8();
    if etx != ETX {
        return Err(FrameError::BadEndMarker(etx));
    }

    Ok(Incoming::Frame(Frame {
        sequence,
        ack,
        checksum,
        payload,
    }))
}
