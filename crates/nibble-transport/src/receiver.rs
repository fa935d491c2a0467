//! # Frame Receiver
//!
//! Turns the nibble stream into validated frames and feeds the shared session
//! state the transmitter works from.
//!
//! ```text
//!            SYN probe: listening
//!   ┌──────┐ ACK probe ┌───────────┐  EOT frame  ┌─────────────┐
//!   │ Sync │──────────▶│ Receiving │────────────▶│ SwitchAwait │
//!   └──────┘◀──────────└───────────┘◀────────────└─────────────┘
//!        malformed frame / SYN block     flush once
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, NibblePort};
use crate::config::LinkConfig;
use crate::content::ReassemblyBuffer;
use crate::error::LinkError;
use crate::session::SessionState;
use crate::stats::ReceiverStats;
use crate::sync::{ProbeKind, Synchronizer};
use crate::wire::{self, Acknowledgement, FrameError, Incoming, Probe, SENTINEL_SEQUENCE, SOH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Handshaking: waiting for the peer's probes.
    Sync,
    /// Peer announced end of transmission; deliver what we have.
    SwitchAwait,
    /// Aligned and collecting frames.
    Receiving,
}

/// What a complete frame buffer turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    EndOfTransmission,
    /// Payload stored and acknowledgement queued.
    Accepted { sequence: u32, duplicate: bool },
    Keepalive,
    /// NAK queued, payload discarded.
    ChecksumMismatch { sequence: u32 },
    /// Dropped; the receiver went back to handshaking.
    Malformed(FrameError),
    /// Sequence beyond the reassembly bound; handled like a malformed frame.
    OutOfRange { sequence: u32 },
}

/// Everything a stopped receiver hands back.
#[derive(Debug)]
pub struct ReceiverReport<W> {
    pub stats: ReceiverStats,
    pub output: W,
    /// The reassembled (padded) peer content.
    pub reassembled: Vec<u8>,
    /// Whether the content was flushed to `output`.
    pub delivered: bool,
}

pub struct FrameReceiver<C, W> {
    port: NibblePort<C>,
    session: Arc<SessionState>,
    config: LinkConfig,
    sync: Synchronizer,
    state: ReceiverState,
    frame_buf: Vec<u8>,
    buffer: ReassemblyBuffer,
    received: HashSet<u32>,
    output: W,
    delivered: bool,
    stats: ReceiverStats,
}

impl<C: Channel, W: Write> FrameReceiver<C, W> {
    pub fn new(
        port: NibblePort<C>,
        session: Arc<SessionState>,
        config: LinkConfig,
        output: W,
    ) -> Self {
        Self {
            sync: Synchronizer::new(&config),
            buffer: ReassemblyBuffer::new(config.payload_size, config.max_reassembly_bytes),
            frame_buf: Vec::with_capacity(wire::frame_len(config.payload_size)),
            port,
            session,
            config,
            state: ReceiverState::Sync,
            received: HashSet::new(),
            output,
            delivered: false,
            stats: ReceiverStats::new(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// The reassembly buffer so far.
    pub fn reassembled(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Run the state machine until the session shuts down.
    pub fn begin_listening(&mut self) -> Result<(), LinkError> {
        info!("receiver listening");
        loop {
            match self.step() {
                Ok(()) => {}
                Err(e) if e.is_shutdown() => {
                    debug!(stats = ?self.stats, "receiver stopped");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "receiver failed");
                    return Err(e);
                }
            }
        }
    }

    /// [`begin_listening`](Self::begin_listening), then hand back the report.
    pub fn run(mut self) -> Result<ReceiverReport<W>, LinkError> {
        self.begin_listening()?;
        Ok(self.into_report())
    }

    pub fn into_report(self) -> ReceiverReport<W> {
        ReceiverReport {
            stats: self.stats,
            output: self.output,
            reassembled: self.buffer.as_slice().to_vec(),
            delivered: self.delivered,
        }
    }

    /// One state-machine iteration.
    pub fn step(&mut self) -> Result<(), LinkError> {
        match self.state {
            ReceiverState::Sync => self.handshake(),
            ReceiverState::Receiving => self.receive_block(),
            ReceiverState::SwitchAwait => {
                self.state = ReceiverState::Receiving;
                self.deliver()
            }
        }
    }

    fn handshake(&mut self) -> Result<(), LinkError> {
        self.sync.await_falling_edge(&self.port)?;
        self.sync.skip_slack(&self.port)?;
        match self.sync.read_probe(&self.port)? {
            ProbeKind::SyncIdle => {
                if !self.session.flags.is_listening() {
                    debug!("peer idle probe heard");
                }
                self.session.flags.mark_idle_seen();
            }
            ProbeKind::Ack => {
                self.session.flags.mark_ack_seen();
                self.frame_buf.clear();
                self.state = ReceiverState::Receiving;
                info!("link established");
            }
            ProbeKind::FrameStart if self.session.flags.is_listening() => {
                // Our ACK burst was lost but the peer heard our probes.
                self.session.flags.mark_ack_seen();
                self.frame_buf.clear();
                self.state = ReceiverState::Receiving;
                info!("link established (peer already sending frames)");
            }
            ProbeKind::FrameStart | ProbeKind::Unrecognized => trace!("unrecognized probe"),
        }
        Ok(())
    }

    fn receive_block(&mut self) -> Result<(), LinkError> {
        self.sync.await_falling_edge(&self.port)?;
        self.sync.skip_slack(&self.port)?;
        let block = self.sync.read_block(&self.port)?;

        if self.frame_buf.is_empty() && block[0] != SOH {
            if block == Probe::SyncIdle.bytes() {
                debug!("peer is resynchronizing");
                self.resync();
            } else {
                self.stats.noise_blocks += 1;
                trace!(?block, "discarding block outside a frame");
            }
            return Ok(());
        }

        self.frame_buf.extend_from_slice(&block);
        if self.frame_buf.len() >= wire::frame_len(self.config.payload_size) {
            let raw = std::mem::take(&mut self.frame_buf);
            self.accept_frame(&raw)?;
            self.frame_buf = raw;
            self.frame_buf.clear();
        }
        Ok(())
    }

    /// Validate one complete frame buffer and apply it to the session state.
    pub fn accept_frame(&mut self, raw: &[u8]) -> Result<FrameOutcome, LinkError> {
        self.stats.frames_received += 1;

        let frame = match wire::decode(raw, self.config.payload_size) {
            Ok(Incoming::EndOfTransmission) => {
                debug!("end of transmission received");
                self.state = ReceiverState::SwitchAwait;
                return Ok(FrameOutcome::EndOfTransmission);
            }
            Ok(Incoming::Frame(frame)) => frame,
            Err(e) => {
                debug!(error = %e, "malformed frame");
                self.stats.malformed += 1;
                self.resync();
                return Ok(FrameOutcome::Malformed(e));
            }
        };

        if !frame.checksum_matches() {
            debug!(sequence = frame.sequence, "checksum mismatch");
            self.stats.checksum_failures += 1;
            if !frame.is_keepalive() {
                self.session.enqueue(&self.session.neg_ack_queue, frame.sequence)?;
            }
            return Ok(FrameOutcome::ChecksumMismatch {
                sequence: frame.sequence,
            });
        }

        self.apply_acknowledgement(frame.ack)?;

        if frame.is_keepalive() {
            self.stats.keepalives += 1;
            return Ok(FrameOutcome::Keepalive);
        }

        let sequence = frame.sequence;
        if let Err(e) = self.buffer.write(sequence, &frame.payload) {
            debug!(error = %e, "dropping frame");
            self.stats.out_of_range += 1;
            self.resync();
            return Ok(FrameOutcome::OutOfRange { sequence });
        }
        self.session.enqueue(&self.session.ack_queue, sequence)?;

        let duplicate = !self.received.insert(sequence);
        if duplicate {
            self.stats.duplicates += 1;
        } else {
            self.stats.accepted += 1;
        }
        trace!(sequence, duplicate, "frame accepted");
        Ok(FrameOutcome::Accepted {
            sequence,
            duplicate,
        })
    }

    fn apply_acknowledgement(&mut self, ack: Acknowledgement) -> Result<(), LinkError> {
        match ack {
            Acknowledgement::Ack(SENTINEL_SEQUENCE) | Acknowledgement::Nak(SENTINEL_SEQUENCE) => {}
            Acknowledgement::Ack(sequence) => {
                if self.session.pending_ack.remove(sequence) {
                    self.stats.acks_received += 1;
                    trace!(sequence, "acknowledged");
                }
                self.session.resend_requests.remove(sequence);
            }
            Acknowledgement::Nak(sequence) => {
                self.stats.naks_received += 1;
                debug!(sequence, "negative acknowledgement");
                if self.config.nak_retransmit
                    && self.session.pending_ack.contains(sequence) == Some(true)
                {
                    self.session.enqueue(&self.session.resend_requests, sequence)?;
                }
            }
        }
        Ok(())
    }

    fn resync(&mut self) {
        self.stats.resyncs += 1;
        self.session.flags.reset();
        self.frame_buf.clear();
        self.state = ReceiverState::Sync;
    }

    /// Write the reassembled content to the output, once per session.
    ///
    /// The peer is marked finished even when the write fails; the failure
    /// stops the receiver with [`LinkError::Io`].
    fn deliver(&mut self) -> Result<(), LinkError> {
        self.session.flags.set_partner_finished();
        if self.delivered {
            return Ok(());
        }
        self.output.write_all(self.buffer.as_slice())?;
        self.output.flush()?;
        self.delivered = true;
        self.stats.bytes_delivered = self.buffer.len() as u64;
        info!(bytes = self.buffer.len(), "peer content delivered");
        Ok(())
    }
}
