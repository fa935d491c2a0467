use std::time::Duration;

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender,
};
use nibble_transport::{Channel, ChannelError};

/// One endpoint of a simulated 4-bit bus. Every nibble written arrives exactly
/// once, in order, at the other endpoint.
pub struct SimChannel {
    tx: Sender<u8>,
    rx: Receiver<u8>,
    io_timeout: Duration,
}

/// Two endpoints wired to each other. `capacity` nibbles can be in flight per
/// direction; reads and writes give up after `io_timeout` so the caller can
/// release the shared port.
pub fn wire_pair(capacity: usize, io_timeout: Duration) -> (SimChannel, SimChannel) {
    let (a_tx, b_rx) = bounded(capacity);
    let (b_tx, a_rx) = bounded(capacity);
    (
        SimChannel {
            tx: a_tx,
            rx: a_rx,
            io_timeout,
        },
        SimChannel {
            tx: b_tx,
            rx: b_rx,
            io_timeout,
        },
    )
}

impl SimChannel {
    /// Nibbles waiting to be read at this end.
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }
}

impl Channel for SimChannel {
    fn read_nibble(&mut self) -> Result<u8, ChannelError> {
        self.rx.recv_timeout(self.io_timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ChannelError::Timeout,
            RecvTimeoutError::Disconnected => ChannelError::Closed,
        })
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), ChannelError> {
        self.tx
            .send_timeout(nibble, self.io_timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => ChannelError::Timeout,
                SendTimeoutError::Disconnected(_) => ChannelError::Closed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibbles_cross_over() {
        let (mut a, mut b) = wire_pair(8, Duration::from_millis(10));
        a.write_nibble(0x3).unwrap();
        a.write_nibble(0xC).unwrap();
        b.write_nibble(0x7).unwrap();
        assert_eq!(b.backlog(), 2);
        assert_eq!(b.read_nibble().unwrap(), 0x3);
        assert_eq!(b.read_nibble().unwrap(), 0xC);
        assert_eq!(a.read_nibble().unwrap(), 0x7);
    }

    #[test]
    fn empty_wire_times_out() {
        let (mut a, _b) = wire_pair(8, Duration::from_millis(1));
        assert!(matches!(a.read_nibble(), Err(ChannelError::Timeout)));
    }

    #[test]
    fn full_wire_times_out() {
        let (mut a, _b) = wire_pair(1, Duration::from_millis(1));
        a.write_nibble(1).unwrap();
        assert!(matches!(a.write_nibble(2), Err(ChannelError::Timeout)));
    }

    #[test]
    fn dropped_peer_closes() {
        let (mut a, b) = wire_pair(1, Duration::from_millis(1));
        drop(b);
        assert!(matches!(a.read_nibble(), Err(ChannelError::Closed)));
        assert!(matches!(a.write_nibble(1), Err(ChannelError::Closed)));
    }
}
