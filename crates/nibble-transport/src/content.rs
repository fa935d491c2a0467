//! # Content Buffers
//!
//! [`TransmissionContent`] is the transmitter's outbound stream, zero-padded
//! to whole packages. [`ReassemblyBuffer`] is the receiver's reconstruction of
//! the peer's stream, written package by package at `sequence * payload_size`.

use bytes::Bytes;
use thiserror::Error;

use crate::wire::{checksum, SENTINEL_SEQUENCE};

// ─── Transmission Content ───────────────────────────────────────────────────

/// The full outbound stream, padded to a multiple of the payload size.
#[derive(Debug, Clone)]
pub struct TransmissionContent {
    data: Bytes,
    payload_size: usize,
    original_len: usize,
}

impl TransmissionContent {
    /// Pad `raw` with zeros up to the next multiple of `payload_size`.
    pub fn new(raw: impl Into<Vec<u8>>, payload_size: usize) -> Self {
        assert!(payload_size > 0, "payload size must be non-zero");
        let mut data = raw.into();
        let original_len = data.len();
        let remainder = original_len % payload_size;
        if remainder != 0 {
            data.resize(original_len + payload_size - remainder, 0);
        }
        TransmissionContent {
            data: Bytes::from(data),
            payload_size,
            original_len,
        }
    }

    /// Empty content: the endpoint only listens and acknowledges.
    pub fn empty(payload_size: usize) -> Self {
        Self::new(Vec::new(), payload_size)
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Length before padding.
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    /// Length after padding.
    pub fn padded_len(&self) -> usize {
        self.data.len()
    }

    /// Number of packages (and therefore sequence numbers).
    pub fn package_count(&self) -> u32 {
        (self.data.len() / self.payload_size) as u32
    }

    /// Every sequence number, in send order.
    pub fn sequence_numbers(&self) -> impl Iterator<Item = u32> {
        0..self.package_count()
    }

    /// Payload of one package. Zero-copy.
    pub fn package(&self, sequence: u32) -> Option<Bytes> {
        if sequence == SENTINEL_SEQUENCE || sequence >= self.package_count() {
            return None;
        }
        let start = sequence as usize * self.payload_size;
        Some(self.data.slice(start..start + self.payload_size))
    }

    /// Checksum of one package, as it goes on the wire.
    pub fn package_checksum(&self, sequence: u32) -> Option<u16> {
        self.package(sequence).map(|p| checksum(&p))
    }

    /// The padded bytes.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

// ─── Reassembly Buffer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("sequence {sequence} would grow the reassembly buffer to {required} bytes (limit {limit})")]
    OutOfRange {
        sequence: u32,
        required: usize,
        limit: usize,
    },
    #[error("payload of {actual} bytes, expected {expected}")]
    PayloadSize { expected: usize, actual: usize },
}

/// Receiver-side reconstruction of the peer's content.
///
/// Grows to fit the highest sequence seen, never shrinks. Gaps are zero until
/// their package arrives.
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    data: Vec<u8>,
    payload_size: usize,
    max_len: usize,
}

impl ReassemblyBuffer {
    pub fn new(payload_size: usize, max_len: usize) -> Self {
        ReassemblyBuffer {
            data: Vec::new(),
            payload_size,
            max_len,
        }
    }

    /// Write one package at its offset, growing the buffer if needed.
    pub fn write(&mut self, sequence: u32, payload: &[u8]) -> Result<(), ContentError> {
        if payload.len() != self.payload_size {
            return Err(ContentError::PayloadSize {
                expected: self.payload_size,
                actual: payload.len(),
            });
        }
        let start = (sequence as usize).saturating_mul(self.payload_size);
        let end = start.saturating_add(self.payload_size);
        if end > self.max_len {
            return Err(ContentError::OutOfRange {
                sequence,
                required: end,
                limit: self.max_len,
            });
        }
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(payload);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_whole_packages() {
        let content = TransmissionContent::new(b"ABCDEF".to_vec(), 4);
        assert_eq!(content.original_len(), 6);
        assert_eq!(content.padded_len(), 8);
        assert_eq!(content.package_count(), 2);
        assert_eq!(content.as_bytes().as_ref(), b"ABCDEF\0\0");
        assert_eq!(content.sequence_numbers().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn exact_multiple_is_not_padded() {
        let content = TransmissionContent::new(vec![7u8; 512], 256);
        assert_eq!(content.padded_len(), 512);
        assert_eq!(content.package_count(), 2);
    }

    #[test]
    fn empty_content_has_no_packages() {
        let content = TransmissionContent::empty(256);
        assert_eq!(content.package_count(), 0);
        assert!(content.package(0).is_none());
    }

    #[test]
    fn package_slices() {
        let content = TransmissionContent::new(b"ABCDEF".to_vec(), 4);
        assert_eq!(content.package(0).unwrap().as_ref(), b"ABCD");
        assert_eq!(content.package(1).unwrap().as_ref(), b"EF\0\0");
        assert!(content.package(2).is_none());
        assert!(content.package(SENTINEL_SEQUENCE).is_none());
        assert_eq!(
            content.package_checksum(1),
            Some(u16::from(b'E') + u16::from(b'F'))
        );
    }

    #[test]
    fn reassembly_grows_for_out_of_order() {
        let mut buf = ReassemblyBuffer::new(4, 1024);
        buf.write(2, b"IJKL").unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf.as_slice()[..8], &[0u8; 8]);
        buf.write(0, b"ABCD").unwrap();
        buf.write(1, b"EFGH").unwrap();
        assert_eq!(buf.as_slice(), b"ABCDEFGHIJKL");
    }

    #[test]
    fn reassembly_rejects_beyond_limit() {
        let mut buf = ReassemblyBuffer::new(4, 16);
        assert!(buf.write(3, b"abcd").is_ok());
        assert_eq!(
            buf.write(4, b"abcd"),
            Err(ContentError::OutOfRange {
                sequence: 4,
                required: 20,
                limit: 16
            })
        );
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn reassembly_rejects_short_payload() {
        let mut buf = ReassemblyBuffer::new(4, 16);
        assert!(matches!(
            buf.write(0, b"ab"),
            Err(ContentError::PayloadSize { .. })
        ));
    }
}
