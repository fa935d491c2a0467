use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nibble_transport::{Channel, ChannelError};
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;

/// Seeded line impairments applied to one endpoint's channel.
///
/// Corruption and drops hit outgoing nibbles whose index falls inside
/// `active`; leading noise is returned by the first reads, before anything
/// the peer wrote.
#[derive(Debug, Clone)]
pub struct ImpairmentConfig {
    pub seed: u64,
    /// Chance (%) that an outgoing nibble has one line flipped.
    pub corrupt_percent: f64,
    /// Chance (%) that an outgoing nibble never arrives.
    pub drop_percent: f64,
    /// Random nibbles read before the real stream.
    pub leading_noise: usize,
    /// Outgoing nibble indices subject to corruption and drops.
    pub active: Range<u64>,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            corrupt_percent: 0.0,
            drop_percent: 0.0,
            leading_noise: 0,
            active: 0..u64::MAX,
        }
    }
}

/// What an [`ImpairedChannel`] has done so far. Shared so it can be read
/// after the channel moved into a session.
#[derive(Debug, Default)]
pub struct ImpairmentCounters {
    pub written: AtomicU64,
    pub corrupted: AtomicU64,
    pub dropped: AtomicU64,
    pub noise: AtomicU64,
}

impl ImpairmentCounters {
    pub fn corrupted(&self) -> u64 {
        self.corrupted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn noise(&self) -> u64 {
        self.noise.load(Ordering::Relaxed)
    }
}

pub struct ImpairedChannel<C> {
    inner: C,
    config: ImpairmentConfig,
    rng: StdRng,
    written: u64,
    noise_left: usize,
    counters: Arc<ImpairmentCounters>,
}

impl<C: Channel> ImpairedChannel<C> {
    pub fn new(inner: C, config: ImpairmentConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            noise_left: config.leading_noise,
            inner,
            config,
            written: 0,
            counters: Arc::default(),
        }
    }

    pub fn counters(&self) -> Arc<ImpairmentCounters> {
        Arc::clone(&self.counters)
    }

    fn chance(&mut self, percent: f64) -> bool {
        percent > 0.0 && self.rng.random::<f64>() * 100.0 < percent
    }
}

impl<C: Channel> Channel for ImpairedChannel<C> {
    fn read_nibble(&mut self) -> Result<u8, ChannelError> {
        if self.noise_left > 0 {
            self.noise_left -= 1;
            self.counters.noise.fetch_add(1, Ordering::Relaxed);
            return Ok(self.rng.random::<u8>() & 0x0F);
        }
        self.inner.read_nibble()
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), ChannelError> {
        let index = self.written;
        let mut nibble = nibble;
        if self.config.active.contains(&index) {
            if self.chance(self.config.drop_percent) {
                self.written += 1;
                self.counters.written.store(self.written, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            if self.chance(self.config.corrupt_percent) {
                nibble ^= 1 << (self.rng.random::<u8>() % 4);
                self.counters.corrupted.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.inner.write_nibble(nibble)?;
        self.written += 1;
        self.counters.written.store(self.written, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::wire_pair;
    use std::time::Duration;

    fn pair(config: ImpairmentConfig) -> (ImpairedChannel<crate::SimChannel>, crate::SimChannel) {
        let (a, b) = wire_pair(1024, Duration::from_millis(5));
        (ImpairedChannel::new(a, config), b)
    }

    #[test]
    fn clean_config_is_transparent() {
        let (mut a, mut b) = pair(ImpairmentConfig::default());
        for n in 0..16u8 {
            a.write_nibble(n).unwrap();
        }
        let got: Vec<u8> = (0..16).map(|_| b.read_nibble().unwrap()).collect();
        assert_eq!(got, (0..16u8).collect::<Vec<_>>());
        assert_eq!(a.counters().corrupted(), 0);
    }

    #[test]
    fn full_corruption_flips_one_line() {
        let (mut a, mut b) = pair(ImpairmentConfig {
            corrupt_percent: 100.0,
            ..Default::default()
        });
        for _ in 0..32 {
            a.write_nibble(0x5).unwrap();
            let got = b.read_nibble().unwrap();
            assert_eq!((got ^ 0x5).count_ones(), 1);
        }
        assert_eq!(a.counters().corrupted(), 32);
    }

    #[test]
    fn impairment_only_inside_active_range() {
        let (mut a, mut b) = pair(ImpairmentConfig {
            drop_percent: 100.0,
            active: 2..4,
            ..Default::default()
        });
        for n in 0..6u8 {
            a.write_nibble(n).unwrap();
        }
        let got: Vec<u8> = (0..4).map(|_| b.read_nibble().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 4, 5]);
        assert_eq!(a.counters().dropped(), 2);
    }

    #[test]
    fn leading_noise_precedes_stream() {
        let (mut a, mut b) = pair(ImpairmentConfig {
            leading_noise: 5,
            seed: 7,
            ..Default::default()
        });
        b.write_nibble(0xA).unwrap();
        for _ in 0..5 {
            assert!(a.read_nibble().unwrap() <= 0x0F);
        }
        assert_eq!(a.read_nibble().unwrap(), 0xA);
        assert_eq!(a.counters().noise(), 5);
    }

    #[test]
    fn same_seed_same_damage() {
        let run = || {
            let (mut a, mut b) = pair(ImpairmentConfig {
                seed: 42,
                corrupt_percent: 30.0,
                ..Default::default()
            });
            (0..64u8)
                .map(|n| {
                    a.write_nibble(n & 0x0F).unwrap();
                    b.read_nibble().unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
