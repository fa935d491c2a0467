//! # Nibble Codec
//!
//! Bytes travel as two nibbles, high first. Every group of
//! [`BYTE_BETWEEN_SYNC`] bytes is wrapped in beacons:
//!
//! ```text
//!   1111 0000 | h0 l0 h1 l1 h2 l2 h3 l3 | 0000 1111
//!   leading     group data                 trailing
//! ```
//!
//! The `1111 → 0000` falling edge at the start of each group is the only
//! alignment reference the receiver gets. The trailing pair guarantees the
//! line is high again just before the next leading beacon.

use crate::wire::BYTE_BETWEEN_SYNC;

/// All four lines high.
pub const HIGH: u8 = 0b1111;
/// All four lines low.
pub const LOW: u8 = 0b0000;

/// Mask for the four data lines.
pub const NIBBLE_MASK: u8 = 0x0F;

/// Split a byte into `(high, low)` nibbles.
#[inline]
pub fn split_byte(byte: u8) -> (u8, u8) {
    ((byte >> 4) & NIBBLE_MASK, byte & NIBBLE_MASK)
}

/// Join a `(high, low)` nibble pair into a byte.
#[inline]
pub fn join_nibbles(high: u8, low: u8) -> u8 {
    ((high & NIBBLE_MASK) << 4) | (low & NIBBLE_MASK)
}

/// Stateful byte → nibble encoder. Tracks the position inside the current
/// group across calls so beacons land every [`BYTE_BETWEEN_SYNC`] bytes no
/// matter how the bytes are batched.
#[derive(Debug, Default, Clone)]
pub struct NibbleEncoder {
    bytes_written: u64,
}

impl NibbleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes encoded so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether the next byte starts a new group.
    pub fn at_group_boundary(&self) -> bool {
        self.bytes_written % BYTE_BETWEEN_SYNC as u64 == 0
    }

    /// Append the nibbles for one byte (plus any beacons) to `out`.
    pub fn encode_byte(&mut self, byte: u8, out: &mut Vec<u8>) {
        let position = self.bytes_written % BYTE_BETWEEN_SYNC as u64;
        if position == 0 {
            out.push(HIGH);
            out.push(LOW);
        }

        let (high, low) = split_byte(byte);
        out.push(high);
        out.push(low);

        if position == BYTE_BETWEEN_SYNC as u64 - 1 {
            out.push(LOW);
            out.push(HIGH);
        }

        self.bytes_written += 1;
    }

    /// Encode a run of bytes.
    pub fn encode(&mut self, bytes: &[u8]) -> Vec<u8> {
        let groups = bytes.len() / BYTE_BETWEEN_SYNC + 1;
        let mut out = Vec::with_capacity(bytes.len() * 2 + groups * 4);
        for &b in bytes {
            self.encode_byte(b, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join() {
        assert_eq!(split_byte(0xA5), (0xA, 0x5));
        assert_eq!(join_nibbles(0xA, 0x5), 0xA5);
        assert_eq!(join_nibbles(0xFA, 0xF5), 0xA5);
    }

    #[test]
    fn single_group_is_wrapped() {
        let mut enc = NibbleEncoder::new();
        let out = enc.encode(&[0x16, 0x16, 0x16, 0x16]);
        assert_eq!(
            out,
            vec![0xF, 0x0, 1, 6, 1, 6, 1, 6, 1, 6, 0x0, 0xF]
        );
        assert!(enc.at_group_boundary());
    }

    #[test]
    fn beacons_follow_group_position_across_calls() {
        let mut enc = NibbleEncoder::new();
        let mut out = Vec::new();
        enc.encode_byte(0x12, &mut out);
        enc.encode_byte(0x34, &mut out);
        let rest = enc.encode(&[0x56, 0x78, 0x9A]);
        out.extend(rest);
        assert_eq!(
            out,
            vec![
                0xF, 0x0, 1, 2, 3, 4, 5, 6, 7, 8, 0x0, 0xF, // group 1
                0xF, 0x0, 9, 0xA, // group 2, open
            ]
        );
        assert_eq!(enc.bytes_written(), 5);
        assert!(!enc.at_group_boundary());
    }
}
