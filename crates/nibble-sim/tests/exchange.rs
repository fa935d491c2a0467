//! # Integration tests: two full endpoints over a simulated bus
//!
//! Each test runs both endpoints (receiver and transmitter threads each) over
//! crossed in-memory wires. Clean and noise-only runs must deliver every byte,
//! zero-padded to whole packages. Runs with damage in both directions only
//! have to stay inside the reassembly bound: the checksum covers the payload,
//! not the sequence fields.

use std::time::Duration;

use nibble_sim::{run_exchange, ExchangeConfig, ExchangeOutcome, ImpairmentConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn content(len: usize, salt: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(salt))
        .collect()
}

fn padded(bytes: &[u8], payload_size: usize) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.resize(bytes.len().div_ceil(payload_size) * payload_size, 0);
    out
}

fn assert_delivered(outcome: &ExchangeOutcome, a: &[u8], b: &[u8], payload_size: usize) {
    assert!(outcome.completed, "exchange timed out after {:?}", outcome.elapsed);
    assert!(outcome.a.transmitter.is_ok(), "{:?}", outcome.a.transmitter);
    assert!(outcome.b.transmitter.is_ok(), "{:?}", outcome.b.transmitter);
    assert!(outcome.a.delivered && outcome.b.delivered);
    assert_eq!(outcome.b.received, padded(a, payload_size));
    assert_eq!(outcome.a.received, padded(b, payload_size));
}

#[test]
fn bidirectional_transfer() {
    init_tracing();
    let a = content(1500, 3);
    let b = content(700, 91);
    let config = ExchangeConfig::new(32);
    let outcome = run_exchange(&a, &b, &config).unwrap();
    assert_delivered(&outcome, &a, &b, 32);

    let tx = outcome.a.transmitter.as_ref().unwrap();
    assert!(tx.data_frames >= 47);
    assert_eq!(outcome.b.receiver.as_ref().unwrap().bytes_delivered, 1504);
}

#[test]
fn small_payload_short_message() {
    init_tracing();
    let a = b"Hallo Welt".to_vec();
    let b = b"Moin".to_vec();
    let outcome = run_exchange(&a, &b, &ExchangeConfig::new(4)).unwrap();
    assert_delivered(&outcome, &a, &b, 4);
    assert_eq!(outcome.b.received, b"Hallo Welt\0\0");
}

#[test]
fn one_side_has_nothing_to_send() {
    init_tracing();
    let a = content(300, 17);
    let outcome = run_exchange(&a, &[], &ExchangeConfig::new(16)).unwrap();
    assert_delivered(&outcome, &a, &[], 16);
    assert!(outcome.a.received.is_empty());
    assert_eq!(outcome.b.transmitter.as_ref().unwrap().data_frames, 0);
}

#[test]
fn leading_noise_is_survived() {
    init_tracing();
    let a = content(400, 5);
    let b = content(200, 77);
    let mut config = ExchangeConfig::new(16);
    config.impair_a = Some(ImpairmentConfig {
        seed: 11,
        leading_noise: 53,
        ..Default::default()
    });
    config.impair_b = Some(ImpairmentConfig {
        seed: 12,
        leading_noise: 29,
        ..Default::default()
    });
    let outcome = run_exchange(&a, &b, &config).unwrap();
    assert_delivered(&outcome, &a, &b, 16);
}

#[test]
fn fixed_seed_one_sided_damage_is_repaired() {
    init_tracing();
    // Long enough that both end-of-transmission frames leave A after the
    // damaged stretch. The seed is pinned: a flip inside a sequence field
    // would pass the checksum.
    let a = content(4000, 9);
    let b = content(256, 200);
    let mut config = ExchangeConfig::new(32);
    config.deadline = Duration::from_secs(60);
    config.impair_a = Some(ImpairmentConfig {
        seed: 2024,
        corrupt_percent: 0.3,
        drop_percent: 0.05,
        active: 500..5000,
        ..Default::default()
    });
    let outcome = run_exchange(&a, &b, &config).unwrap();
    assert_delivered(&outcome, &a, &b, 32);

    let rx = outcome.b.receiver.as_ref().unwrap();
    assert!(rx.checksum_failures + rx.malformed + rx.resyncs > 0);
}

#[test]
fn two_sided_damage_stays_within_reassembly_bound() {
    init_tracing();
    const BOUND: usize = 64 * 1024;
    let a = content(1200, 41);
    let b = content(600, 143);
    for seed in [2u64, 8] {
        let mut config = ExchangeConfig::new(16);
        config.link.max_reassembly_bytes = BOUND;
        config.deadline = Duration::from_secs(10);
        config.impair_a = Some(ImpairmentConfig {
            seed,
            corrupt_percent: 0.2,
            drop_percent: 0.05,
            ..Default::default()
        });
        config.impair_b = Some(ImpairmentConfig {
            seed: seed + 100,
            corrupt_percent: 0.2,
            drop_percent: 0.05,
            ..Default::default()
        });
        let outcome = run_exchange(&a, &b, &config).unwrap();

        // Delivered content may hold misplaced packages; only its size is
        // bounded.
        for side in [&outcome.a, &outcome.b] {
            assert!(side.received.len() <= BOUND, "seed {seed}: {}", side.received.len());
            assert_eq!(side.received.len() % 16, 0);
            if !side.delivered {
                assert!(side.received.is_empty());
            }
        }
        let damage: u64 = [&outcome.a, &outcome.b]
            .iter()
            .filter_map(|side| side.receiver.as_ref())
            .map(|rx| rx.checksum_failures + rx.malformed + rx.resyncs + rx.out_of_range)
            .sum();
        assert!(damage > 0, "seed {seed}: no damage observed");
    }
}
