//! Simulation toolkit for the nibble transport.
//!
//! Provides crossed in-memory wires that behave like an exact nibble stream,
//! seeded impairments for them, and end-to-end exchanges between two full
//! endpoints running on their own threads.

pub mod impairment;
pub mod scenario;
pub mod wire;

pub use impairment::{ImpairedChannel, ImpairmentConfig};
pub use scenario::{run_exchange, EndpointOutcome, ExchangeConfig, ExchangeOutcome};
pub use wire::{wire_pair, SimChannel};
