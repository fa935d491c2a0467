//! # Actor Errors

use std::io;
use thiserror::Error;

use crate::channel::ChannelError;

/// Why a receiver or transmitter stopped.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The session's shutdown signal was raised.
    #[error("session shut down")]
    Shutdown,
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("output error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} thread panicked")]
    ActorPanicked(&'static str),
}

impl LinkError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, LinkError::Shutdown)
    }
}
