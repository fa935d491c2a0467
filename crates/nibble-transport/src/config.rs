//! # Link Configuration
//!
//! [`LinkConfig`] holds the resolved tunables. [`LinkConfigInput`] is the
//! TOML-facing form: every field optional, durations in milliseconds.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::queue::DEFAULT_LOCK_TIMEOUT;
use crate::wire::{BYTE_BETWEEN_SYNC, DEFAULT_PAYLOAD_SIZE};

/// Default number of unacknowledged packages in flight.
pub const DEFAULT_WINDOW: usize = 10;

/// Default reassembly ceiling (64 MiB).
pub const DEFAULT_MAX_REASSEMBLY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("payload_size {0} must be a positive multiple of {BYTE_BETWEEN_SYNC}")]
    PayloadSize(usize),
    #[error("window must be at least 1")]
    Window,
    #[error("max_reassembly_bytes {max} is smaller than one payload ({payload_size})")]
    ReassemblyBound { max: usize, payload_size: usize },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfigInput {
    pub payload_size: Option<usize>,
    pub window: Option<usize>,
    pub slot_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub edge_settle_ms: Option<u64>,
    pub edge_slack: Option<usize>,
    pub queue_timeout_ms: Option<u64>,
    pub lock_wait_ms: Option<u64>,
    pub max_reassembly_bytes: Option<usize>,
    pub nak_retransmit: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Payload bytes per frame. Fixed for the session.
    pub payload_size: usize,
    /// Maximum unacknowledged packages in flight.
    pub window: usize,
    /// Duration of one nibble read or write.
    pub slot: Duration,
    /// Sampling interval while hunting for a falling edge.
    pub poll_interval: Duration,
    /// Pause after a detected edge before reading group data.
    pub edge_settle: Duration,
    /// Nibbles discarded after an edge. Sampled hardware lines still show the
    /// beacon's low nibble on the first read; exact streams do not.
    pub edge_slack: usize,
    /// Queue lock-acquisition bound.
    pub queue_timeout: Duration,
    /// Channel lock contention after which a trace is emitted.
    pub lock_wait: Duration,
    /// Frames whose package would grow the reassembly buffer past this are
    /// dropped as malformed.
    pub max_reassembly_bytes: usize,
    /// Retransmit NAKed packages ahead of window rotation.
    pub nak_retransmit: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            payload_size: DEFAULT_PAYLOAD_SIZE,
            window: DEFAULT_WINDOW,
            slot: Duration::from_millis(60),
            poll_interval: Duration::from_millis(10),
            edge_settle: Duration::from_millis(10),
            edge_slack: 1,
            queue_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_wait: Duration::from_millis(100),
            max_reassembly_bytes: DEFAULT_MAX_REASSEMBLY_BYTES,
            nak_retransmit: true,
        }
    }
}

impl LinkConfig {
    /// Parse and resolve a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let input: LinkConfigInput = toml::from_str(text)?;
        input.resolve()
    }

    /// Zero-delay settings for in-memory channels that deliver every nibble
    /// exactly once.
    pub fn exact_stream(payload_size: usize) -> Self {
        Self {
            payload_size,
            slot: Duration::ZERO,
            poll_interval: Duration::ZERO,
            edge_settle: Duration::ZERO,
            edge_slack: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payload_size == 0 || self.payload_size % BYTE_BETWEEN_SYNC != 0 {
            return Err(ConfigError::PayloadSize(self.payload_size));
        }
        if self.window == 0 {
            return Err(ConfigError::Window);
        }
        if self.max_reassembly_bytes < self.payload_size {
            return Err(ConfigError::ReassemblyBound {
                max: self.max_reassembly_bytes,
                payload_size: self.payload_size,
            });
        }
        Ok(())
    }
}

impl LinkConfigInput {
    pub fn resolve(self) -> Result<LinkConfig, ConfigError> {
        let defaults = LinkConfig::default();
        let ms = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };
        let config = LinkConfig {
            payload_size: self.payload_size.unwrap_or(defaults.payload_size),
            window: self.window.unwrap_or(defaults.window),
            slot: ms(self.slot_ms, defaults.slot),
            poll_interval: ms(self.poll_interval_ms, defaults.poll_interval),
            edge_settle: ms(self.edge_settle_ms, defaults.edge_settle),
            edge_slack: self.edge_slack.unwrap_or(defaults.edge_slack),
            queue_timeout: ms(self.queue_timeout_ms, defaults.queue_timeout),
            lock_wait: ms(self.lock_wait_ms, defaults.lock_wait),
            max_reassembly_bytes: self
                .max_reassembly_bytes
                .unwrap_or(defaults.max_reassembly_bytes),
            nak_retransmit: self.nak_retransmit.unwrap_or(defaults.nak_retransmit),
        };
        config.validate()?;
        Ok(config)
    }
}
