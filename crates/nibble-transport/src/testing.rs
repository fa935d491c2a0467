//! # Testing Helpers
//!
//! [`ScriptedChannel`] replays a fixed nibble stream and records every nibble
//! written, so a single actor can be driven deterministically without a peer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, ChannelError};
use crate::session::ShutdownSignal;

/// Handle to the nibbles a [`ScriptedChannel`] has recorded.
pub type WriteLog = Arc<Mutex<Vec<u8>>>;

pub struct ScriptedChannel {
    input: VecDeque<u8>,
    written: WriteLog,
    stop_on_drain: Option<ShutdownSignal>,
}

impl ScriptedChannel {
    pub fn new(input: impl IntoIterator<Item = u8>) -> Self {
        Self {
            input: input.into_iter().collect(),
            written: Arc::default(),
            stop_on_drain: None,
        }
    }

    /// Raise `signal` once the script runs out, so the actor reading it stops
    /// with a shutdown instead of a closed channel.
    pub fn stop_when_drained(mut self, signal: ShutdownSignal) -> Self {
        self.stop_on_drain = Some(signal);
        self
    }

    /// Shared handle to the write log.
    pub fn write_log(&self) -> WriteLog {
        Arc::clone(&self.written)
    }
}

impl Channel for ScriptedChannel {
    fn read_nibble(&mut self) -> Result<u8, ChannelError> {
        match self.input.pop_front() {
            Some(n) => Ok(n),
            None => {
                if let Some(signal) = &self.stop_on_drain {
                    signal.raise();
                }
                Err(ChannelError::Closed)
            }
        }
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), ChannelError> {
        self.written
            .lock()
            .map_err(|_| ChannelError::Closed)?
            .push(nibble);
        Ok(())
    }
}
