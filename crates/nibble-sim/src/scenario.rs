use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use nibble_transport::{
    Channel, LinkConfig, LinkError, ReceiverStats, Session, SessionHandle, SessionReport,
    TransmissionContent, TransmitterStats,
};

use crate::impairment::{ImpairedChannel, ImpairmentConfig};
use crate::wire::wire_pair;

/// Setup for a two-endpoint exchange over one simulated bus.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub link: LinkConfig,
    /// Nibbles in flight per direction.
    pub capacity: usize,
    /// Per-operation wait on the simulated wire.
    pub io_timeout: Duration,
    /// Give up (and shut both endpoints down) after this long.
    pub deadline: Duration,
    /// Impairment on endpoint A's side of the bus.
    pub impair_a: Option<ImpairmentConfig>,
    /// Impairment on endpoint B's side of the bus.
    pub impair_b: Option<ImpairmentConfig>,
}

impl ExchangeConfig {
    pub fn new(payload_size: usize) -> Self {
        Self {
            link: LinkConfig::exact_stream(payload_size),
            capacity: 1024,
            io_timeout: Duration::from_millis(1),
            deadline: Duration::from_secs(30),
            impair_a: None,
            impair_b: None,
        }
    }
}

/// What one endpoint ended up with.
#[derive(Debug)]
pub struct EndpointOutcome {
    pub transmitter: Result<TransmitterStats, LinkError>,
    pub receiver: Option<ReceiverStats>,
    /// Bytes the receiver delivered to its output.
    pub received: Vec<u8>,
    pub delivered: bool,
}

#[derive(Debug)]
pub struct ExchangeOutcome {
    pub a: EndpointOutcome,
    pub b: EndpointOutcome,
    /// Both transmitters terminated before the deadline.
    pub completed: bool,
    pub elapsed: Duration,
}

/// Run endpoint A sending `a_content` and endpoint B sending `b_content` over
/// a crossed pair of simulated wires until both transmitters terminate or the
/// deadline passes.
pub fn run_exchange(
    a_content: &[u8],
    b_content: &[u8],
    config: &ExchangeConfig,
) -> anyhow::Result<ExchangeOutcome> {
    config.link.validate().context("invalid link config")?;
    let payload = config.link.payload_size;
    let (wire_a, wire_b) = wire_pair(config.capacity, config.io_timeout);

    let a = spawn_endpoint(
        impaired(wire_a, config.impair_a.clone()),
        TransmissionContent::new(a_content.to_vec(), payload),
        &config.link,
    )
    .context("spawning endpoint A")?;
    let b = spawn_endpoint(
        impaired(wire_b, config.impair_b.clone()),
        TransmissionContent::new(b_content.to_vec(), payload),
        &config.link,
    )
    .context("spawning endpoint B")?;

    let start = Instant::now();
    let mut completed = true;
    while !(a.transmitter_finished() && b.transmitter_finished()) {
        if start.elapsed() >= config.deadline {
            tracing::warn!(
                a_finished = a.transmitter_finished(),
                b_finished = b.transmitter_finished(),
                "exchange deadline reached"
            );
            completed = false;
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    let elapsed = start.elapsed();

    a.shutdown_signal().raise();
    b.shutdown_signal().raise();
    let a = outcome(a.shutdown());
    let b = outcome(b.shutdown());
    tracing::info!(?elapsed, completed, "exchange finished");

    Ok(ExchangeOutcome {
        a,
        b,
        completed,
        elapsed,
    })
}

fn impaired<C: Channel + 'static>(
    channel: C,
    impairment: Option<ImpairmentConfig>,
) -> Box<dyn Channel> {
    match impairment {
        Some(config) => Box::new(ImpairedChannel::new(channel, config)),
        None => Box::new(channel),
    }
}

fn spawn_endpoint(
    channel: Box<dyn Channel>,
    content: TransmissionContent,
    link: &LinkConfig,
) -> std::io::Result<SessionHandle<Vec<u8>>> {
    Session::spawn(channel, content, Vec::new(), link.clone())
}

fn outcome(report: SessionReport<Vec<u8>>) -> EndpointOutcome {
    match report.receiver {
        Ok(rx) => EndpointOutcome {
            transmitter: report.transmitter,
            receiver: Some(rx.stats),
            received: rx.output,
            delivered: rx.delivered,
        },
        Err(e) => {
            tracing::warn!(error = %e, "receiver failed");
            EndpointOutcome {
                transmitter: report.transmitter,
                receiver: None,
                received: Vec::new(),
                delivered: false,
            }
        }
    }
}
