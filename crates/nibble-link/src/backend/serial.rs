//! Serial port setup for the command/response adapter: raw 8N1, no flow
//! control, reads that give up after a bounded time.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

pub fn open(path: &Path, baud: u32, read_timeout: Duration) -> io::Result<File> {
    let speed = baud_constant(baud).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {baud}"),
        )
    })?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)?;
    configure(&file, speed, read_timeout)?;
    Ok(file)
}

fn configure(file: &File, speed: libc::speed_t, read_timeout: Duration) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is an open descriptor owned by `file` for the whole block,
    // and `tio` is a plain C struct initialised by `tcgetattr`.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
        tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
        tio.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
        // Return as soon as one byte is there, or empty-handed after VTIME.
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = deciseconds(read_timeout);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcflush(fd, libc::TCIOFLUSH) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// VTIME is counted in tenths of a second; zero would make reads
/// non-blocking.
fn deciseconds(timeout: Duration) -> libc::cc_t {
    let tenths = timeout.as_millis().div_ceil(100);
    tenths.clamp(1, libc::cc_t::MAX as u128) as libc::cc_t
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    })
}
