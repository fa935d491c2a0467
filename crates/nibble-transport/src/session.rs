//! # Session
//!
//! Shared coordination state between one endpoint's receiver and transmitter,
//! and the runner that puts each on its own thread.
//!
//! The receiver writes: the connection flags, `ack_queue`, `neg_ack_queue`,
//! `resend_requests`, and removals from `pending_ack`. The transmitter writes
//! additions to `pending_ack` and reads everything else. The two never call
//! each other.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use quanta::Instant;

use crate::channel::{Channel, NibblePort};
use crate::config::LinkConfig;
use crate::content::TransmissionContent;
use crate::error::LinkError;
use crate::queue::TimedQueue;
use crate::receiver::{FrameReceiver, ReceiverReport};
use crate::stats::TransmitterStats;
use crate::transmitter::FrameTransmitter;

// ─── Shutdown ───────────────────────────────────────────────────────────────

/// Cooperative stop flag. Every channel retry loop checks it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ─── Connection Flags ───────────────────────────────────────────────────────

/// Handshake progress as seen by the receiver.
#[derive(Debug, Default)]
pub struct ConnectionFlags {
    established: AtomicBool,
    listening: AtomicBool,
    partner_finished: AtomicBool,
}

impl ConnectionFlags {
    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn is_partner_finished(&self) -> bool {
        self.partner_finished.load(Ordering::Acquire)
    }

    /// The peer's idle probe was heard: we can hear them, they cannot hear us.
    pub fn mark_idle_seen(&self) {
        self.listening.store(true, Ordering::Release);
        self.established.store(false, Ordering::Release);
    }

    /// The peer's ACK probe was heard: both directions work.
    pub fn mark_ack_seen(&self) {
        self.listening.store(true, Ordering::Release);
        self.established.store(true, Ordering::Release);
    }

    /// Alignment lost; handshake again.
    pub fn reset(&self) {
        self.listening.store(false, Ordering::Release);
        self.established.store(false, Ordering::Release);
    }

    /// Record the peer's end of transmission. Returns `true` the first time.
    pub fn set_partner_finished(&self) -> bool {
        !self.partner_finished.swap(true, Ordering::AcqRel)
    }
}

// ─── Session State ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SessionState {
    /// Sequences sent but not yet acknowledged.
    pub pending_ack: TimedQueue,
    /// Sequences received intact that our transmitter must acknowledge.
    pub ack_queue: TimedQueue,
    /// Sequences received with a bad checksum that our transmitter must NAK.
    pub neg_ack_queue: TimedQueue,
    /// Our own pending sequences the peer NAKed.
    pub resend_requests: TimedQueue,
    pub flags: ConnectionFlags,
    pub shutdown: ShutdownSignal,
}

impl SessionState {
    pub fn new(config: &LinkConfig) -> Self {
        Self::with_shutdown(config, ShutdownSignal::new())
    }

    pub fn with_shutdown(config: &LinkConfig, shutdown: ShutdownSignal) -> Self {
        let timeout = config.queue_timeout;
        Self {
            pending_ack: TimedQueue::with_timeout(true, timeout),
            ack_queue: TimedQueue::with_timeout(false, timeout),
            neg_ack_queue: TimedQueue::with_timeout(true, timeout),
            resend_requests: TimedQueue::with_timeout(true, timeout),
            flags: ConnectionFlags::default(),
            shutdown,
        }
    }

    /// Push `value`, retrying lock timeouts until it lands (or is already
    /// present in a deduplicating queue).
    pub fn enqueue(&self, queue: &TimedQueue, value: u32) -> Result<(), LinkError> {
        loop {
            if queue.push(value) {
                return Ok(());
            }
            if queue.is_unique() && queue.contains(value) == Some(true) {
                return Ok(());
            }
            if self.shutdown.is_raised() {
                return Err(LinkError::Shutdown);
            }
            tracing::trace!(value, "queue push timed out, retrying");
        }
    }
}

// ─── Runner ─────────────────────────────────────────────────────────────────

/// Both actors' outcomes.
#[derive(Debug)]
pub struct SessionReport<W> {
    pub transmitter: Result<TransmitterStats, LinkError>,
    pub receiver: Result<ReceiverReport<W>, LinkError>,
}

/// Knobs for [`Session::spawn_with`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Signal to share with the caller, e.g. a Ctrl-C handler installed
    /// before the session starts.
    pub shutdown: ShutdownSignal,
    /// How long the transmitter waits before its first probe. The receiver
    /// starts listening immediately.
    pub transmitter_delay: Duration,
}

/// Starts the two actors of one endpoint.
pub struct Session;

impl Session {
    /// Spawn `nibble-rx` and `nibble-tx` over a shared `channel`.
    pub fn spawn<C, W>(
        channel: C,
        content: TransmissionContent,
        output: W,
        config: LinkConfig,
    ) -> io::Result<SessionHandle<W>>
    where
        C: Channel + 'static,
        W: Write + Send + 'static,
    {
        Self::spawn_with(channel, content, output, config, SessionOptions::default())
    }

    /// Like [`spawn`](Self::spawn), with a caller-owned shutdown signal and a
    /// delayed transmitter start. A config that fails
    /// [`LinkConfig::validate`] is refused with [`io::ErrorKind::InvalidInput`].
    pub fn spawn_with<C, W>(
        channel: C,
        content: TransmissionContent,
        output: W,
        config: LinkConfig,
        options: SessionOptions,
    ) -> io::Result<SessionHandle<W>>
    where
        C: Channel + 'static,
        W: Write + Send + 'static,
    {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let state = Arc::new(SessionState::with_shutdown(&config, options.shutdown));
        let port = NibblePort::new(channel, state.shutdown.clone(), config.lock_wait);

        let receiver = FrameReceiver::new(port.clone(), Arc::clone(&state), config.clone(), output);
        let mut transmitter = FrameTransmitter::new(port, Arc::clone(&state), config, content);

        let rx = thread::Builder::new()
            .name("nibble-rx".into())
            .spawn(move || receiver.run())?;
        let delay = options.transmitter_delay;
        let shutdown = state.shutdown.clone();
        let tx = match thread::Builder::new().name("nibble-tx".into()).spawn(move || {
            sleep_unless_raised(delay, &shutdown)?;
            transmitter.begin_transmission()
        }) {
            Ok(handle) => handle,
            Err(e) => {
                state.shutdown.raise();
                let _ = rx.join();
                return Err(e);
            }
        };

        tracing::debug!(?delay, "session started");
        Ok(SessionHandle {
            state,
            rx: Some(rx),
            tx: Some(tx),
            tx_result: None,
        })
    }
}

/// Sleep for `delay` in short steps, bailing out once `shutdown` is raised.
pub fn sleep_unless_raised(delay: Duration, shutdown: &ShutdownSignal) -> Result<(), LinkError> {
    const STEP: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + delay;
    loop {
        if shutdown.is_raised() {
            return Err(LinkError::Shutdown);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep(STEP.min(deadline - now));
    }
}

pub struct SessionHandle<W> {
    state: Arc<SessionState>,
    rx: Option<thread::JoinHandle<Result<ReceiverReport<W>, LinkError>>>,
    tx: Option<thread::JoinHandle<Result<TransmitterStats, LinkError>>>,
    tx_result: Option<Result<TransmitterStats, LinkError>>,
}

impl<W> SessionHandle<W> {
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.state.shutdown.clone()
    }

    /// Whether the transmitter has stopped (terminated or failed).
    pub fn transmitter_finished(&self) -> bool {
        self.tx_result.is_some() || self.tx.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Block until the transmitter stops.
    pub fn wait_transmitter(&mut self) {
        if let Some(handle) = self.tx.take() {
            self.tx_result = Some(join_actor(handle, "transmitter"));
        }
    }

    /// Raise the shutdown signal, join both actors and collect their results.
    pub fn shutdown(mut self) -> SessionReport<W> {
        self.state.shutdown.raise();
        self.wait_transmitter();
        let transmitter = self
            .tx_result
            .take()
            .unwrap_or(Err(LinkError::ActorPanicked("transmitter")));
        let receiver = match self.rx.take() {
            Some(handle) => join_actor(handle, "receiver"),
            None => Err(LinkError::ActorPanicked("receiver")),
        };
        tracing::debug!("session stopped");
        SessionReport {
            transmitter,
            receiver,
        }
    }
}

fn join_actor<T>(
    handle: thread::JoinHandle<Result<T, LinkError>>,
    name: &'static str,
) -> Result<T, LinkError> {
    handle.join().unwrap_or_else(|_| {
        tracing::error!(actor = name, "actor panicked");
        Err(LinkError::ActorPanicked(name))
    })
}
