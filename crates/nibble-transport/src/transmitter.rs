//! # Frame Transmitter
//!
//! Windowed ARQ over the nibble channel. The transmitter never reads the
//! channel; everything it knows about the peer arrives through the session
//! state the receiver maintains.
//!
//! ```text
//!   Sync ──established──▶ (ACK burst once) ──▶ Send ⇄ Resend
//!    ▲                                          │
//!    └──── link lost ◀── RespondOnly ◀──────────┘ nothing outstanding
//!                            │
//!                            └── peer finished ──▶ closing EOT ──▶ Terminated
//! ```
//!
//! Each iteration performs the current state's action, then evaluates the
//! next state. When that evaluation hits a queue lock timeout it is retried
//! without repeating the action.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, NibblePort};
use crate::config::LinkConfig;
use crate::content::TransmissionContent;
use crate::error::LinkError;
use crate::nibble::NibbleEncoder;
use crate::session::SessionState;
use crate::stats::TransmitterStats;
use crate::wire::{self, Acknowledgement, Frame, Probe, BYTE_BETWEEN_SYNC};

/// ACK bytes sent once when the link comes up, and per ACK probe.
pub const ACK_BURST_BYTES: usize = BYTE_BETWEEN_SYNC * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterState {
    Sync,
    Send,
    Resend,
    RespondOnly,
    Terminated,
}

pub struct FrameTransmitter<C> {
    port: NibblePort<C>,
    session: Arc<SessionState>,
    config: LinkConfig,
    content: TransmissionContent,
    /// Sequences never sent yet, in order.
    outbound: VecDeque<u32>,
    already_sent_acks: HashSet<u32>,
    last_sent_ack: Option<u32>,
    encoder: NibbleEncoder,
    ack_burst_owed: bool,
    eot_sent: bool,
    stats: TransmitterStats,
}

impl<C: Channel> FrameTransmitter<C> {
    pub fn new(
        port: NibblePort<C>,
        session: Arc<SessionState>,
        config: LinkConfig,
        content: TransmissionContent,
    ) -> Self {
        debug_assert_eq!(content.payload_size(), config.payload_size);
        Self {
            outbound: content.sequence_numbers().collect(),
            port,
            session,
            config,
            content,
            already_sent_acks: HashSet::new(),
            last_sent_ack: None,
            encoder: NibbleEncoder::new(),
            ack_burst_owed: true,
            eot_sent: false,
            stats: TransmitterStats::new(),
        }
    }

    pub fn stats(&self) -> &TransmitterStats {
        &self.stats
    }

    /// Sequences not yet sent for the first time.
    pub fn unsent(&self) -> usize {
        self.outbound.len()
    }

    /// Run until the closing handshake completes.
    pub fn begin_transmission(&mut self) -> Result<TransmitterStats, LinkError> {
        info!(
            packages = self.content.package_count(),
            bytes = self.content.original_len(),
            "transmitter starting"
        );
        let mut state = TransmitterState::Sync;
        let mut act = true;
        loop {
            if act {
                self.act(state)?;
            }
            match self.advance()? {
                Some(TransmitterState::Terminated) => {
                    info!(stats = ?self.stats, "transmission complete");
                    return Ok(self.stats.clone());
                }
                Some(next) => {
                    if next == TransmitterState::Sync && state != TransmitterState::Sync {
                        self.stats.resyncs += 1;
                        debug!(from = ?state, "link lost, handshaking");
                    }
                    state = next;
                    act = true;
                }
                None => {
                    trace!("state evaluation timed out");
                    act = false;
                }
            }
        }
    }

    /// Perform one state's action.
    pub fn act(&mut self, state: TransmitterState) -> Result<(), LinkError> {
        match state {
            TransmitterState::Sync => self.send_probe(),
            TransmitterState::Send => self.send_next(),
            TransmitterState::Resend => self.resend(),
            TransmitterState::RespondOnly => self.respond(),
            TransmitterState::Terminated => Ok(()),
        }
    }

    /// Decide the next state. `None` when a queue lock timed out.
    pub fn advance(&mut self) -> Result<Option<TransmitterState>, LinkError> {
        let flags = &self.session.flags;
        if !flags.is_established() || !flags.is_listening() {
            return Ok(Some(TransmitterState::Sync));
        }

        if self.ack_burst_owed {
            self.ack_burst_owed = false;
            debug!("link up, sending acknowledgement burst");
            self.write_bytes(&[wire::ACK; ACK_BURST_BYTES])?;
        }

        let Some(nothing_pending) = self.session.pending_ack.is_empty() else {
            return Ok(None);
        };
        if nothing_pending && self.outbound.is_empty() {
            if self.session.flags.is_partner_finished() {
                debug!("peer finished, closing");
                self.write_eot()?;
                return Ok(Some(TransmitterState::Terminated));
            }
            return Ok(Some(TransmitterState::RespondOnly));
        }

        if self.config.nak_retransmit {
            let Some(no_requests) = self.session.resend_requests.is_empty() else {
                return Ok(None);
            };
            if !no_requests {
                return Ok(Some(TransmitterState::Resend));
            }
        }

        let Some(outstanding) = self.session.pending_ack.len() else {
            return Ok(None);
        };
        if outstanding < self.config.window && !self.outbound.is_empty() {
            Ok(Some(TransmitterState::Send))
        } else {
            Ok(Some(TransmitterState::Resend))
        }
    }

    // ─── Actions ────────────────────────────────────────────────────────────

    fn send_probe(&mut self) -> Result<(), LinkError> {
        // Re-announce everything once the link is back.
        self.ack_burst_owed = true;
        self.eot_sent = false;
        // The last acknowledgement may never have arrived.
        if let Some(last) = self.last_sent_ack {
            if self.session.ack_queue.contains(last) == Some(false) {
                self.session.ack_queue.push(last);
            }
        }

        self.stats.probes += 1;
        if self.session.flags.is_listening() {
            let probe = Probe::Ack.bytes();
            let burst: Vec<u8> = probe.iter().copied().cycle().take(ACK_BURST_BYTES).collect();
            self.write_bytes(&burst)
        } else {
            self.write_bytes(&Probe::SyncIdle.bytes())
        }
    }

    fn send_next(&mut self) -> Result<(), LinkError> {
        let Some(sequence) = self.outbound.pop_front() else {
            return Ok(());
        };
        self.session.enqueue(&self.session.pending_ack, sequence)?;
        self.stats.data_frames += 1;
        trace!(sequence, "sending");
        self.send_package(sequence)
    }

    fn resend(&mut self) -> Result<(), LinkError> {
        let sequence = match self.next_requested() {
            Some(sequence) => {
                self.stats.nak_retransmissions += 1;
                Some(sequence)
            }
            None => self.session.pending_ack.rotate_front(),
        };
        let Some(sequence) = sequence else {
            return Ok(());
        };
        self.stats.retransmissions += 1;
        trace!(sequence, "resending");
        self.send_package(sequence)
    }

    /// A NAK-requested sequence that is still unacknowledged.
    fn next_requested(&self) -> Option<u32> {
        if !self.config.nak_retransmit {
            return None;
        }
        while let Some(sequence) = self.session.resend_requests.pop() {
            if self.session.pending_ack.contains(sequence) == Some(true) {
                return Some(sequence);
            }
        }
        None
    }

    fn respond(&mut self) -> Result<(), LinkError> {
        if !self.eot_sent {
            debug!("nothing left to send, announcing end of transmission");
            return self.write_eot();
        }
        let ack = self.choose_acknowledgement();
        self.stats.keepalives += 1;
        self.send_frame(&Frame::keepalive(ack, self.config.payload_size))
    }

    // ─── Framing ────────────────────────────────────────────────────────────

    fn send_package(&mut self, sequence: u32) -> Result<(), LinkError> {
        let Some(payload) = self.content.package(sequence) else {
            warn!(sequence, "no package for sequence");
            return Ok(());
        };
        let ack = self.choose_acknowledgement();
        self.send_frame(&Frame::data(sequence, ack, payload))
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), LinkError> {
        match frame.ack {
            Acknowledgement::Nak(_) => self.stats.naks_sent += 1,
            Acknowledgement::Ack(s) if s != wire::SENTINEL_SEQUENCE => self.stats.acks_sent += 1,
            Acknowledgement::Ack(_) => {}
        }
        self.stats.frames_sent += 1;
        self.write_bytes(&frame.to_bytes())
    }

    fn write_eot(&mut self) -> Result<(), LinkError> {
        self.eot_sent = true;
        self.stats.eot_sent += 1;
        self.stats.frames_sent += 1;
        self.write_bytes(&wire::eot_frame(self.config.payload_size))
    }

    /// Acknowledgement for the next frame: a fresh ACK, else a pending NAK,
    /// else a repeat ACK for a package the peer re-delivered, else none.
    fn choose_acknowledgement(&mut self) -> Acknowledgement {
        let mut repeat = None;
        while let Some(sequence) = self.session.ack_queue.pop() {
            if self.already_sent_acks.insert(sequence) {
                self.last_sent_ack = Some(sequence);
                if let Some(r) = repeat {
                    self.session.ack_queue.push(r);
                }
                return Acknowledgement::Ack(sequence);
            }
            repeat.get_or_insert(sequence);
        }

        if let Some(sequence) = self.session.neg_ack_queue.pop() {
            if let Some(r) = repeat {
                self.session.ack_queue.push(r);
            }
            return Acknowledgement::Nak(sequence);
        }

        match repeat {
            Some(sequence) => {
                self.last_sent_ack = Some(sequence);
                Acknowledgement::Ack(sequence)
            }
            None => Acknowledgement::NONE,
        }
    }

    /// Encode `bytes` to nibbles (with beacons) and put them on the channel.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let nibbles = self.encoder.encode(bytes);
        self.port.write_all(&nibbles, self.config.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ShutdownSignal;
    use crate::testing::{ScriptedChannel, WriteLog};
    use std::time::Duration;

    fn transmitter(content: &[u8]) -> (FrameTransmitter<ScriptedChannel>, Arc<SessionState>, WriteLog) {
        let config = LinkConfig::exact_stream(4);
        let session = Arc::new(SessionState::new(&config));
        let channel = ScriptedChannel::new([]);
        let log = channel.write_log();
        let port = NibblePort::new(channel, ShutdownSignal::new(), Duration::from_millis(100));
        let content = TransmissionContent::new(content.to_vec(), 4);
        (
            FrameTransmitter::new(port, Arc::clone(&session), config, content),
            session,
            log,
        )
    }

    fn written(log: &WriteLog) -> usize {
        log.lock().unwrap().len()
    }

    #[test]
    fn probes_until_established() {
        let (mut tx, session, log) = transmitter(b"ABCD");
        assert_eq!(tx.advance().unwrap(), Some(TransmitterState::Sync));

        tx.act(TransmitterState::Sync).unwrap();
        // One SYN group: beacon + 8 nibbles + trailer.
        assert_eq!(
            *log.lock().unwrap(),
            vec![0xF, 0x0, 1, 6, 1, 6, 1, 6, 1, 6, 0x0, 0xF]
        );

        session.flags.mark_idle_seen();
        tx.act(TransmitterState::Sync).unwrap();
        assert_eq!(written(&log), 12 + 36);
        assert_eq!(tx.advance().unwrap(), Some(TransmitterState::Sync));
    }

    #[test]
    fn ack_burst_is_sent_once_when_established() {
        let (mut tx, session, log) = transmitter(b"ABCD");
        session.flags.mark_ack_seen();
        assert_eq!(tx.advance().unwrap(), Some(TransmitterState::Send));
        assert_eq!(written(&log), 36);
        assert_eq!(tx.advance().unwrap(), Some(TransmitterState::Send));
        assert_eq!(written(&log), 36);
    }

    #[test]
    fn window_bounds_pending() {
        let content: Vec<u8> = (0..=255u8).cycle().take(4 * 25).collect();
        let (mut tx, session, _log) = transmitter(&content);
        session.flags.mark_ack_seen();

        let mut state = tx.advance().unwrap().unwrap();
        for _ in 0..40 {
            tx.act(state).unwrap();
            assert!(session.pending_ack.len().unwrap() <= 10);
            state = tx.advance().unwrap().unwrap();
        }
        assert_eq!(session.pending_ack.len(), Some(10));
        assert_eq!(tx.unsent(), 15);
        assert_eq!(state, TransmitterState::Resend);
        assert_eq!(tx.stats().data_frames, 10);
        assert!(tx.stats().retransmissions > 0);
    }

    #[test]
    fn acknowledged_sequences_are_not_resent() {
        let (mut tx, session, _log) = transmitter(b"ABCDEFGH");
        session.flags.mark_ack_seen();
        tx.advance().unwrap();
        tx.act(TransmitterState::Send).unwrap();
        tx.act(TransmitterState::Send).unwrap();
        assert_eq!(session.pending_ack.snapshot(), Some(vec![0, 1]));

        session.pending_ack.remove(0);
        for _ in 0..3 {
            assert_eq!(tx.advance().unwrap(), Some(TransmitterState::Resend));
            tx.act(TransmitterState::Resend).unwrap();
            assert_eq!(session.pending_ack.snapshot(), Some(vec![1]));
        }
        assert_eq!(tx.stats().retransmissions, 3);
    }

    #[test]
    fn nak_request_is_resent_first() {
        let (mut tx, session, _log) = transmitter(b"ABCDEFGHIJKL");
        session.flags.mark_ack_seen();
        tx.advance().unwrap();
        for _ in 0..3 {
            tx.act(TransmitterState::Send).unwrap();
        }
        session.resend_requests.push(2);
        assert_eq!(tx.advance().unwrap(), Some(TransmitterState::Resend));
        tx.act(TransmitterState::Resend).unwrap();
        assert_eq!(tx.stats().nak_retransmissions, 1);
        assert_eq!(session.pending_ack.snapshot(), Some(vec![0, 1, 2]));
        assert_eq!(session.resend_requests.is_empty(), Some(true));
    }

    #[test]
    fn respond_only_sends_eot_then_keepalives() {
        let (mut tx, session, log) = transmitter(b"");
        session.flags.mark_ack_seen();
        assert_eq!(tx.advance().unwrap(), Some(TransmitterState::RespondOnly));
        let after_burst = written(&log);

        tx.act(TransmitterState::RespondOnly).unwrap();
        tx.act(TransmitterState::RespondOnly).unwrap();
        let stats = tx.stats();
        assert_eq!(stats.eot_sent, 1);
        assert_eq!(stats.keepalives, 1);
        // Two 20-byte frames: 5 groups of 12 nibbles each.
        assert_eq!(written(&log) - after_burst, 2 * 5 * 12);
    }

    #[test]
    fn terminates_after_partner_finished() {
        let (mut tx, session, _log) = transmitter(b"");
        session.flags.mark_ack_seen();
        session.flags.set_partner_finished();
        assert_eq!(tx.advance().unwrap(), Some(TransmitterState::Terminated));
        assert_eq!(tx.stats().eot_sent, 1);
        assert_eq!(tx.begin_transmission().unwrap().eot_sent, 2);
    }

    #[test]
    fn acknowledgement_priority() {
        let (mut tx, session, _log) = transmitter(b"");
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::NONE);

        session.ack_queue.push(4);
        session.neg_ack_queue.push(7);
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::Ack(4));
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::Nak(7));

        // Re-delivered package 4: a repeat ACK, but only after fresh ones.
        session.ack_queue.push(4);
        session.ack_queue.push(5);
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::Ack(5));
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::Ack(4));
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::NONE);
    }

    #[test]
    fn sync_requeues_last_acknowledgement() {
        let (mut tx, session, _log) = transmitter(b"");
        session.ack_queue.push(9);
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::Ack(9));
        tx.act(TransmitterState::Sync).unwrap();
        tx.act(TransmitterState::Sync).unwrap();
        assert_eq!(session.ack_queue.snapshot(), Some(vec![9]));
        assert_eq!(tx.choose_acknowledgement(), Acknowledgement::Ack(9));
    }
}
