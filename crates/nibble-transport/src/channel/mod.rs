//! # Nibble Channels
//!
//! A [`Channel`] moves one 4-bit value per call in either direction. It has
//! no clock, no framing and no ordering guarantee beyond what the hardware
//! gives; everything above that is built by the receiver and transmitter.
//!
//! [`NibblePort`] is the shared, paced handle both actors use: exclusive
//! access through a try-lock, the operation, release, then sleep out the rest
//! of the nibble slot. Failures are retried inside the port so the state
//! machines only ever see a nibble or a shutdown.
//!
//! Implementations:
//! - [`register::RegisterChannel`]: direct output/input register access
//! - [`command::CommandChannel`]: `R` / `W n` command protocol over a stream

pub mod command;
pub mod register;

use std::io;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use quanta::Instant;
use thiserror::Error;

use crate::error::LinkError;
use crate::nibble::NIBBLE_MASK;
use crate::session::ShutdownSignal;

pub use command::CommandChannel;
pub use register::{RegisterChannel, RegisterPort};

/// Warn on the first channel failure and then once per this many.
const WARN_EVERY: u64 = 100;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Nothing arrived in time. Retried silently.
    #[error("channel timed out")]
    Timeout,
    #[error("channel I/O: {0}")]
    Io(#[from] io::Error),
    /// The backend is gone for good.
    #[error("channel closed")]
    Closed,
}

/// A 4-bit bidirectional line.
pub trait Channel: Send {
    /// Sample the input lines. Only the low four bits are meaningful.
    fn read_nibble(&mut self) -> Result<u8, ChannelError>;

    /// Drive the output lines with the low four bits of `nibble`.
    fn write_nibble(&mut self, nibble: u8) -> Result<(), ChannelError>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn read_nibble(&mut self) -> Result<u8, ChannelError> {
        (**self).read_nibble()
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), ChannelError> {
        (**self).write_nibble(nibble)
    }
}

// ─── Shared Port ────────────────────────────────────────────────────────────

/// Paced, lock-shared access to a [`Channel`].
pub struct NibblePort<C> {
    channel: Arc<Mutex<C>>,
    shutdown: ShutdownSignal,
    lock_wait: Duration,
}

impl<C> Clone for NibblePort<C> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            shutdown: self.shutdown.clone(),
            lock_wait: self.lock_wait,
        }
    }
}

impl<C: Channel> NibblePort<C> {
    pub fn new(channel: C, shutdown: ShutdownSignal, lock_wait: Duration) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
            shutdown,
            lock_wait,
        }
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Read one nibble, occupying at least `slot`.
    pub fn read_nibble(&self, slot: Duration) -> Result<u8, LinkError> {
        self.paced(slot, |channel| channel.read_nibble())
            .map(|n| n & NIBBLE_MASK)
    }

    /// Write one nibble, occupying at least `slot`.
    pub fn write_nibble(&self, nibble: u8, slot: Duration) -> Result<(), LinkError> {
        self.paced(slot, |channel| channel.write_nibble(nibble & NIBBLE_MASK))
    }

    /// Write a run of nibbles, one slot each.
    pub fn write_all(&self, nibbles: &[u8], slot: Duration) -> Result<(), LinkError> {
        for &n in nibbles {
            self.write_nibble(n, slot)?;
        }
        Ok(())
    }

    fn paced<T>(
        &self,
        slot: Duration,
        mut op: impl FnMut(&mut C) -> Result<T, ChannelError>,
    ) -> Result<T, LinkError> {
        let mut failures = 0u64;
        loop {
            if self.shutdown.is_raised() {
                return Err(LinkError::Shutdown);
            }

            let start = Instant::now();
            let result = {
                let mut guard = self.acquire(start)?;
                op(&mut guard)
            };
            pace(start, slot);

            match result {
                Ok(value) => return Ok(value),
                Err(ChannelError::Timeout) => {}
                Err(ChannelError::Closed) => {
                    if self.shutdown.is_raised() {
                        return Err(LinkError::Shutdown);
                    }
                    return Err(LinkError::Channel(ChannelError::Closed));
                }
                Err(e) => {
                    if failures % WARN_EVERY == 0 {
                        tracing::warn!(error = %e, failures, "channel operation failed, retrying");
                    }
                    failures += 1;
                }
            }
        }
    }

    /// Spin on the channel lock. Emits one trace when contention lasts longer
    /// than `lock_wait`, and gives up only on shutdown.
    fn acquire(&self, start: Instant) -> Result<std::sync::MutexGuard<'_, C>, LinkError> {
        let mut reported = false;
        loop {
            match self.channel.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if self.shutdown.is_raised() {
                        return Err(LinkError::Shutdown);
                    }
                    if !reported && start.elapsed() >= self.lock_wait {
                        tracing::trace!(waited_ms = start.elapsed().as_millis() as u64, "channel lock busy");
                        reported = true;
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// Sleep until `start + slot`; yield when there is no slot to fill.
fn pace(start: Instant, slot: Duration) {
    if slot.is_zero() {
        std::thread::yield_now();
        return;
    }
    let remaining = slot.saturating_sub(start.elapsed());
    if !remaining.is_zero() {
        std::thread::sleep(remaining);
    }
}
