//! # nibble-link
//!
//! Sends everything read from stdin to the peer at the other end of a 4-bit
//! parallel link and writes what the peer sends to stdout. Both ends run the
//! same binary; the session ends once each side has delivered the other's
//! content.
//!
//! ```bash
//! # Serial adapter on both machines
//! nibble-link -ard < outgoing.txt > incoming.txt
//!
//! # Register backend, smaller frames, verbose
//! RUST_LOG=debug nibble-link -b15f --payload-size 64 < a.bin > b.bin
//! ```

mod backend;
mod cli;
mod settings;

use std::io::{self, Read};

use anyhow::Context as _;
use nibble_transport::session::sleep_unless_raised;
use nibble_transport::{Session, SessionOptions, ShutdownSignal, TransmissionContent};

use crate::cli::Invocation;

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    // stdout carries the peer's content, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = match cli::parse_args(std::env::args().skip(1))? {
        Invocation::Run(args) => args,
        Invocation::Help => {
            eprint!("{}", cli::HELP);
            return Ok(());
        }
    };
    let settings = settings::load(&args)?;

    tracing::info!(
        backend = args.backend.flag(),
        payload_size = settings.link.payload_size,
        window = settings.link.window,
        slot_ms = settings.link.slot.as_millis() as u64,
        "nibble-link starting"
    );

    // ── Backend ─────────────────────────────────────────────────
    let channel = backend::open(&settings.backend)?;

    // ── Content ─────────────────────────────────────────────────
    let mut input = Vec::new();
    io::stdin()
        .lock()
        .read_to_end(&mut input)
        .context("reading stdin")?;
    let content = TransmissionContent::new(input, settings.link.payload_size);
    tracing::info!(
        bytes = content.original_len(),
        packages = content.package_count(),
        "content loaded"
    );

    // ── Graceful shutdown ───────────────────────────────────────
    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            shutdown.raise();
        })
        .context("installing Ctrl-C handler")?;
    }

    if sleep_unless_raised(settings.backend.startup_delay, &shutdown).is_err() {
        tracing::info!("interrupted before start");
        return Ok(());
    }

    // ── Session ─────────────────────────────────────────────────
    let mut session = Session::spawn_with(
        channel,
        content,
        io::stdout(),
        settings.link.clone(),
        SessionOptions {
            shutdown,
            transmitter_delay: settings.backend.transmitter_delay,
        },
    )
    .context("starting session")?;

    session.wait_transmitter();
    let report = session.shutdown();

    // ── Report ──────────────────────────────────────────────────
    let mut interrupted = false;
    match report.transmitter {
        Ok(stats) => tracing::info!(stats = %json(&stats), "transmitter finished"),
        Err(e) if e.is_shutdown() => interrupted = true,
        Err(e) => return Err(e).context("transmitter failed"),
    }
    match report.receiver {
        Ok(rx) => {
            tracing::info!(
                stats = %json(&rx.stats),
                delivered = rx.delivered,
                "receiver finished"
            );
            if !rx.delivered {
                tracing::warn!(
                    received = rx.reassembled.len(),
                    "peer never finished; nothing written to stdout"
                );
            }
        }
        Err(e) => return Err(e).context("receiver failed"),
    }
    if interrupted {
        tracing::warn!("interrupted before the exchange completed");
    }
    Ok(())
}

fn json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}
