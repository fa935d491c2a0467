//! Command/response channel over a byte stream (typically a serial port to a
//! microcontroller that drives the lines).
//!
//! ```text
//!   read:   host → 'R'            device → one byte, low nibble = lines
//!   write:  host → 'W' <nibble>   no reply
//! ```

use std::io::{ErrorKind, Read, Write};

use super::{Channel, ChannelError};
use crate::nibble::NIBBLE_MASK;

pub const READ_COMMAND: u8 = b'R';
pub const WRITE_COMMAND: u8 = b'W';

pub struct CommandChannel<S> {
    stream: S,
}

impl<S: Read + Write + Send> CommandChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + Send> Channel for CommandChannel<S> {
    fn read_nibble(&mut self) -> Result<u8, ChannelError> {
        self.stream.write_all(&[READ_COMMAND])?;
        self.stream.flush()?;
        let mut reply = [0u8; 1];
        match self.stream.read(&mut reply) {
            // A read timeout on a raw tty surfaces as a zero-length read.
            Ok(0) => Err(ChannelError::Timeout),
            Ok(_) => Ok(reply[0] & NIBBLE_MASK),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(ChannelError::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), ChannelError> {
        self.stream.write_all(&[WRITE_COMMAND, nibble & NIBBLE_MASK])?;
        self.stream.flush()?;
        Ok(())
    }
}
