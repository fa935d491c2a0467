//! # Link Statistics
//!
//! Per-actor counters. Each actor owns its stats exclusively and hands them
//! back when it stops; nothing here is shared across threads.

use serde::Serialize;

// ─── Transmitter Stats ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransmitterStats {
    /// Frames written, of every kind.
    pub frames_sent: u64,
    /// First transmissions of a package.
    pub data_frames: u64,
    /// Repeat transmissions of a package (window rotation or NAK).
    pub retransmissions: u64,
    /// Retransmissions requested by a NAK.
    pub nak_retransmissions: u64,
    /// Sentinel frames carrying only an acknowledgement.
    pub keepalives: u64,
    /// Handshake probe groups.
    pub probes: u64,
    /// Frames carrying a real ACK.
    pub acks_sent: u64,
    /// Frames carrying a NAK.
    pub naks_sent: u64,
    /// Times the state machine fell back to handshaking.
    pub resyncs: u64,
    /// End-of-transmission frames written.
    pub eot_sent: u64,
}

impl TransmitterStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retransmission overhead ratio.
    pub fn retransmit_ratio(&self) -> f64 {
        let total = self.data_frames + self.retransmissions;
        if total == 0 {
            0.0
        } else {
            self.retransmissions as f64 / total as f64
        }
    }
}

// ─── Receiver Stats ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    /// Complete frame-sized buffers parsed.
    pub frames_received: u64,
    /// Data frames written to the reassembly buffer for the first time.
    pub accepted: u64,
    /// Data frames for a sequence already received.
    pub duplicates: u64,
    /// Keep-alive frames.
    pub keepalives: u64,
    pub checksum_failures: u64,
    /// Structurally invalid frames.
    pub malformed: u64,
    /// Frames whose sequence exceeds the reassembly bound.
    pub out_of_range: u64,
    /// Blocks discarded while waiting for a start marker.
    pub noise_blocks: u64,
    /// Returns to the handshake state.
    pub resyncs: u64,
    /// Real ACKs taken out of the pending set.
    pub acks_received: u64,
    pub naks_received: u64,
    /// Bytes written to the output sink.
    pub bytes_delivered: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of parsed frames that were usable.
    pub fn goodput_ratio(&self) -> f64 {
        if self.frames_received == 0 {
            0.0
        } else {
            (self.accepted + self.duplicates + self.keepalives) as f64
                / self.frames_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_handle_zero() {
        assert_eq!(TransmitterStats::new().retransmit_ratio(), 0.0);
        assert_eq!(ReceiverStats::new().goodput_ratio(), 0.0);
    }

    #[test]
    fn retransmit_ratio() {
        let stats = TransmitterStats {
            data_frames: 3,
            retransmissions: 1,
            ..Default::default()
        };
        assert!((stats.retransmit_ratio() - 0.25).abs() < f64::EPSILON);
    }
}
