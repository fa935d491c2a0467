//! Register backend over `/dev/port`: the output lines are the low nibble of
//! the data register at `base`, the input lines the high nibble of the status
//! register at `base + 1`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use nibble_transport::channel::RegisterPort;

pub const DEV_PORT: &str = "/dev/port";

const STATUS_OFFSET: u64 = 1;
/// The status register's top line reads inverted.
const INVERTED_LINES: u8 = 0x80;

pub struct PortRegisters {
    file: File,
    base: u64,
}

impl PortRegisters {
    pub fn open(base: u16) -> io::Result<Self> {
        Self::open_at(Path::new(DEV_PORT), base)
    }

    /// Open a register file other than `/dev/port`.
    pub fn open_at(path: &Path, base: u16) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            base: u64::from(base),
        })
    }
}

impl RegisterPort for PortRegisters {
    fn write_output(&mut self, value: u8) -> io::Result<()> {
        self.file.write_all_at(&[value], self.base)
    }

    fn read_input(&mut self) -> io::Result<u8> {
        let mut value = [0u8; 1];
        self.file
            .read_exact_at(&mut value, self.base + STATUS_OFFSET)?;
        Ok(value[0] ^ INVERTED_LINES)
    }
}
