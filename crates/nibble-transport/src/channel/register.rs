//! Direct register channel: the four output lines sit in the low nibble of an
//! output register, the four input lines in the high nibble of an input
//! register.

use std::io;

use super::{Channel, ChannelError};
use crate::nibble::NIBBLE_MASK;

/// Raw byte-wide register access.
pub trait RegisterPort: Send {
    fn write_output(&mut self, value: u8) -> io::Result<()>;
    fn read_input(&mut self) -> io::Result<u8>;
}

pub struct RegisterChannel<P> {
    port: P,
}

impl<P: RegisterPort> RegisterChannel<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    pub fn into_inner(self) -> P {
        self.port
    }
}

impl<P: RegisterPort> Channel for RegisterChannel<P> {
    fn read_nibble(&mut self) -> Result<u8, ChannelError> {
        Ok((self.port.read_input()? >> 4) & NIBBLE_MASK)
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), ChannelError> {
        self.port.write_output(nibble & NIBBLE_MASK)?;
        Ok(())
    }
}
