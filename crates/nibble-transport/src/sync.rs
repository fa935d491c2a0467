//! # Synchronizer
//!
//! Recovers group alignment from the nibble stream. The only reference is the
//! `1111 → 0000` falling edge at the start of every group; after it (and after
//! the configured slack) the next eight nibbles are the group's four bytes.
//!
//! While handshaking, only the first four nibbles of a group are read and
//! classified as a probe.

use std::time::Duration;

use crate::channel::{Channel, NibblePort};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::nibble::{join_nibbles, split_byte, HIGH, LOW};
use crate::wire::{Probe, BYTE_BETWEEN_SYNC, SOH};

/// Nibbles sampled for probe classification.
pub const PROBE_NIBBLES: usize = 4;

// ─── Edge Detection ─────────────────────────────────────────────────────────

/// Detects `HIGH` immediately followed by `LOW`.
#[derive(Debug, Default, Clone)]
pub struct EdgeDetector {
    prev: Option<u8>,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample; `true` when it completes a falling edge.
    pub fn feed(&mut self, nibble: u8) -> bool {
        let edge = self.prev == Some(HIGH) && nibble == LOW;
        self.prev = Some(nibble);
        edge
    }
}

// ─── Probe Classification ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    SyncIdle,
    Ack,
    /// The group opens a frame: the peer is already past the handshake.
    FrameStart,
    Unrecognized,
}

impl From<Probe> for ProbeKind {
    fn from(probe: Probe) -> Self {
        match probe {
            Probe::SyncIdle => ProbeKind::SyncIdle,
            Probe::Ack => ProbeKind::Ack,
        }
    }
}

// ─── Synchronizer ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Synchronizer {
    poll_interval: Duration,
    slot: Duration,
    edge_slack: usize,
    edge_settle: Duration,
}

impl Synchronizer {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            slot: config.slot,
            edge_slack: config.edge_slack,
            edge_settle: config.edge_settle,
        }
    }

    /// Sample at the poll interval until a falling edge, then let the line
    /// settle.
    pub fn await_falling_edge<C: Channel>(&self, port: &NibblePort<C>) -> Result<(), LinkError> {
        let mut detector = EdgeDetector::new();
        let mut samples = 0u64;
        while !detector.feed(port.read_nibble(self.poll_interval)?) {
            samples += 1;
        }
        tracing::trace!(samples, "falling edge");
        if !self.edge_settle.is_zero() {
            std::thread::sleep(self.edge_settle);
        }
        Ok(())
    }

    /// Discard the nibbles that still belong to the beacon.
    pub fn skip_slack<C: Channel>(&self, port: &NibblePort<C>) -> Result<(), LinkError> {
        for _ in 0..self.edge_slack {
            port.read_nibble(self.slot)?;
        }
        Ok(())
    }

    /// Read and classify the first nibbles of a group.
    pub fn read_probe<C: Channel>(&self, port: &NibblePort<C>) -> Result<ProbeKind, LinkError> {
        let mut nibbles = [0u8; PROBE_NIBBLES];
        for n in nibbles.iter_mut() {
            *n = port.read_nibble(self.slot)?;
        }
        Ok(Self::classify(&nibbles))
    }

    /// Read one group's bytes, high nibble first.
    pub fn read_block<C: Channel>(
        &self,
        port: &NibblePort<C>,
    ) -> Result<[u8; BYTE_BETWEEN_SYNC], LinkError> {
        let mut block = [0u8; BYTE_BETWEEN_SYNC];
        for byte in block.iter_mut() {
            let high = port.read_nibble(self.slot)?;
            let low = port.read_nibble(self.slot)?;
            *byte = join_nibbles(high, low);
        }
        Ok(block)
    }

    /// Classify `[high, low, high, low]` probe nibbles.
    pub fn classify(nibbles: &[u8; PROBE_NIBBLES]) -> ProbeKind {
        for probe in [Probe::SyncIdle, Probe::Ack] {
            let (high, low) = split_byte(probe.marker());
            if nibbles[1] == low && nibbles[3] == low && nibbles[0] == high && nibbles[2] == high {
                return probe.into();
            }
        }
        let (high, low) = split_byte(SOH);
        if nibbles[0] == high && nibbles[1] == low {
            return ProbeKind::FrameStart;
        }
        ProbeKind::Unrecognized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nibble::NibbleEncoder;
    use crate::session::ShutdownSignal;
    use crate::testing::ScriptedChannel;

    fn port(nibbles: Vec<u8>) -> NibblePort<ScriptedChannel> {
        NibblePort::new(
            ScriptedChannel::new(nibbles),
            ShutdownSignal::new(),
            Duration::from_millis(100),
        )
    }

    fn exact() -> Synchronizer {
        Synchronizer::new(&LinkConfig::exact_stream(4))
    }

    #[test]
    fn edge_detector_needs_adjacent_high_low() {
        let mut d = EdgeDetector::new();
        assert!(!d.feed(LOW));
        assert!(!d.feed(HIGH));
        assert!(!d.feed(0x7));
        assert!(!d.feed(LOW));
        assert!(!d.feed(HIGH));
        assert!(!d.feed(HIGH));
        assert!(d.feed(LOW));
    }

    #[test]
    fn classify_probes() {
        assert_eq!(Synchronizer::classify(&[1, 6, 1, 6]), ProbeKind::SyncIdle);
        assert_eq!(Synchronizer::classify(&[0, 6, 0, 6]), ProbeKind::Ack);
        assert_eq!(Synchronizer::classify(&[1, 6, 0, 6]), ProbeKind::Unrecognized);
        assert_eq!(Synchronizer::classify(&[1, 5, 1, 6]), ProbeKind::Unrecognized);
        assert_eq!(Synchronizer::classify(&[0, 1, 0, 0]), ProbeKind::FrameStart);
        assert_eq!(Synchronizer::classify(&[1, 0, 0, 1]), ProbeKind::Unrecognized);
    }

    #[test]
    fn reads_probe_after_edge() {
        let mut nibbles = vec![0x3, 0x9];
        nibbles.extend(NibbleEncoder::new().encode(&Probe::Ack.bytes()));
        let port = port(nibbles);
        let sync = exact();
        sync.await_falling_edge(&port).unwrap();
        sync.skip_slack(&port).unwrap();
        assert_eq!(sync.read_probe(&port).unwrap(), ProbeKind::Ack);
    }

    #[test]
    fn slack_skips_repeated_beacon_sample() {
        // A sampled line reads the low beacon twice.
        let port = port(vec![HIGH, LOW, LOW, 0x1, 0x2, 0x3, 0x4, 0x5, 0x6, 0x7, 0x8]);
        let sync = Synchronizer {
            edge_slack: 1,
            ..exact()
        };
        sync.await_falling_edge(&port).unwrap();
        sync.skip_slack(&port).unwrap();
        assert_eq!(sync.read_block(&port).unwrap(), [0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn consecutive_groups_realign() {
        let nibbles = NibbleEncoder::new().encode(b"ABCDEFGH");
        let port = port(nibbles);
        let sync = exact();
        sync.await_falling_edge(&port).unwrap();
        assert_eq!(&sync.read_block(&port).unwrap(), b"ABCD");
        sync.await_falling_edge(&port).unwrap();
        assert_eq!(&sync.read_block(&port).unwrap(), b"EFGH");
    }
}
