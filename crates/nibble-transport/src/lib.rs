//! # nibble-transport
//!
//! Reliable byte-stream transport over a slow, clockless, 4-bit-wide channel.
//!
//! The channel moves one nibble per time slot and offers no clock and no
//! framing. Everything above that is synthesized here: falling-edge beacons
//! for alignment, fixed-size frames with start/stop markers and a checksum,
//! and a windowed ARQ with an end-of-transmission handshake run by two
//! concurrent actors.
//!
//! ## Crate structure
//!
//! - [`wire`] — Frame layout, marker bytes, checksum, handshake probes
//! - [`nibble`] — Byte ↔ nibble conversion with resynchronization beacons
//! - [`content`] — Padded transmission content and the reassembly buffer
//! - [`queue`] — Lock-timeout bounded sequence-number queues
//! - [`channel`] — `Channel` trait, paced shared port, hardware adapters
//! - [`sync`] — Falling-edge detection and probe classification
//! - [`receiver`] — Receiver state machine
//! - [`transmitter`] — Transmitter (ARQ) state machine
//! - [`session`] — Shared coordination state and the two-thread runner
//! - [`config`] — Tunables and their TOML representation
//! - [`stats`] — Per-actor counters
//! - [`error`] — Actor-level error type
//! - [`testing`] — Scripted channel for deterministic tests

pub mod channel;
pub mod config;
pub mod content;
pub mod error;
pub mod nibble;
pub mod queue;
pub mod receiver;
pub mod session;
pub mod stats;
pub mod sync;
pub mod testing;
pub mod transmitter;
pub mod wire;

pub use channel::{Channel, ChannelError, NibblePort};
pub use config::{ConfigError, LinkConfig};
pub use content::{ReassemblyBuffer, TransmissionContent};
pub use error::LinkError;
pub use queue::TimedQueue;
pub use receiver::{FrameReceiver, ReceiverReport};
pub use session::{
    Session, SessionHandle, SessionOptions, SessionReport, SessionState, ShutdownSignal,
};
pub use stats::{ReceiverStats, TransmitterStats};
pub use transmitter::FrameTransmitter;
