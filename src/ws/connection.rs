#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::router::{Listeners, Router};
use super::traits::{BoxSocket, Frame, Transport};
use crate::Result;
use crate::types::{Message, parse_messages};

/// Connection state tracking.
///
/// Transitions: `Closed -> Connecting -> Open -> Closing -> Closed` for a requested
/// disconnect, `Open -> Closed` for an unexpected close and `Connecting -> Closed` for
/// a failed attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected
    Closed,
    /// Waiting for the transport to open
    Connecting,
    /// Connected; sends are written immediately
    Open,
    /// A disconnect was requested and the transport is closing
    Closing,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Everything guarded by the single serialization point.
struct Core {
    state: ConnectionState,
    /// Bumped on every `connect()`; tasks holding an older value are stale
    generation: u64,
    /// Cancels the current connection attempt or open session
    session: Option<CancellationToken>,
    /// Cancels the pending automatic reconnect
    reconnect_timer: Option<CancellationToken>,
    /// Write side of the open session
    writer: Option<mpsc::UnboundedSender<String>>,
    /// Envelopes submitted while not open, oldest first
    queue: VecDeque<String>,
    reconnect_attempts: u32,
    backoff: ExponentialBackoff,
}

impl Core {
    /// Write immediately when open, otherwise queue for the next open.
    fn submit(&mut self, json: String) {
        let json = match &self.writer {
            Some(writer) if self.state.is_open() => match writer.send(json) {
                Ok(()) => return,
                Err(mpsc::error::SendError(json)) => json,
            },
            _ => json,
        };
        self.queue.push_back(json);
    }
}

struct Shared {
    config: Config,
    endpoint: Url,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    core: Mutex<Core>,
    state_tx: watch::Sender<ConnectionState>,
    router: Arc<Router>,
    listeners: Arc<Listeners>,
}

/// Why a session's read/write loop ended.
enum Exit {
    /// `disconnect()` (or a newer `connect()`) cancelled the session
    Requested,
    /// The peer closed, the stream ended or a write failed
    Remote,
}

/// Manages connection lifecycle, reconnection, heartbeat and the outbound queue.
///
/// All state lives behind one mutex so transitions, queue flushes and sends are totally
/// ordered even though socket I/O runs on Tokio tasks. Callbacks are never invoked while
/// that mutex is held.
///
/// - `connect()` spawns one session task per attempt; each attempt gets a new generation
///   and a stale task never mutates a newer connection.
/// - On open the queue is drained into the session's writer before the state becomes
///   visible as [`ConnectionState::Open`], so queued envelopes always precede later sends.
/// - The heartbeat lives in the session loop and only sends while the state is `Open`.
/// - Unexpected closes schedule a reconnect through [`ExponentialBackoff`].
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a closed connection manager.
    ///
    /// Must be called within a Tokio runtime; connection tasks are spawned on it.
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        router: Arc<Router>,
        listeners: Arc<Listeners>,
    ) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let runtime = Handle::try_current()?;
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let backoff = ExponentialBackoff::from(&config.reconnect);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                endpoint,
                transport,
                runtime,
                core: Mutex::new(Core {
                    state: ConnectionState::Closed,
                    generation: 0,
                    session: None,
                    reconnect_timer: None,
                    writer: None,
                    queue: VecDeque::new(),
                    reconnect_attempts: 0,
                    backoff,
                }),
                state_tx,
                router,
                listeners,
            }),
        })
    }

    /// Start connecting. A no-op while connecting or open.
    pub fn connect(&self) {
        self.shared.connect(None);
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// The heartbeat stops immediately; the state becomes
    /// [`ConnectionState::Closed`] once the transport confirms the close.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Serialize and send `request`, or queue it until the next open.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;

        #[cfg(feature = "tracing")]
        if self.shared.config.debug {
            tracing::trace!(%json, "Submitting message");
        }

        self.shared.lock().submit(json);
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Subscribe to connection state changes.
    ///
    /// Returns a receiver that notifies when the connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Number of envelopes waiting for the next open.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Automatic reconnection attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().reconnect_attempts
    }
}

impl Shared {
    // Every critical section leaves Core consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, core: &mut Core, next: ConnectionState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(from = %core.state, to = %next, url = %self.endpoint, "Connection state changed");

        core.state = next;
        _ = self.state_tx.send_replace(next);
    }

    /// Start a new attempt. `timer` is set when called by a reconnect timer.
    fn connect(self: &Arc<Self>, timer: Option<&CancellationToken>) {
        let (generation, token) = {
            let mut core = self.lock();

            // Lost the race against disconnect() or a manual connect()
            if timer.is_some_and(CancellationToken::is_cancelled) {
                return;
            }
            if matches!(
                core.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                return;
            }

            if let Some(pending) = core.reconnect_timer.take() {
                pending.cancel();
            }
            // A session still closing is abandoned; its socket is dropped
            if let Some(stale) = core.session.take() {
                stale.cancel();
            }

            core.generation = core.generation.wrapping_add(1);
            core.writer = None;
            let token = CancellationToken::new();
            core.session = Some(token.clone());
            self.transition(&mut core, ConnectionState::Connecting);

            (core.generation, token)
        };

        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            shared.run_session(generation, token).await;
        });
    }

    fn disconnect(&self) {
        let mut core = self.lock();

        if let Some(timer) = core.reconnect_timer.take() {
            timer.cancel();
        }

        if matches!(
            core.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            self.transition(&mut core, ConnectionState::Closing);
            if let Some(session) = &core.session {
                session.cancel();
            }
        }
    }

    /// One connection attempt and, if it opens, the session that follows.
    async fn run_session(self: Arc<Self>, generation: u64, token: CancellationToken) {
        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.endpoint, generation, "Connecting");

        let opened = tokio::select! {
            () = token.cancelled() => None,
            result = self.transport.open(&self.endpoint, &self.config.protocols) => Some(result),
        };

        let mut socket = match opened {
            Some(Ok(socket)) => socket,
            Some(Err(error)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(url = %self.endpoint, error = %error, "Unable to connect");

                if self.lock().generation == generation {
                    self.listeners.emit_error(&error);
                }
                self.finish(generation, None);
                return;
            }
            // Abandoned before the transport opened
            None => {
                self.finish(generation, None);
                return;
            }
        };

        let Some(writer_rx) = self.mark_open(generation) else {
            // Abandoned while the handshake completed
            _ = socket.close().await;
            self.finish(generation, None);
            return;
        };

        self.listeners.emit_open();
        self.drive(socket, writer_rx, generation, &token).await;
    }

    /// Connecting -> Open. Flushes the queue into a fresh writer.
    fn mark_open(&self, generation: u64) -> Option<mpsc::UnboundedReceiver<String>> {
        let mut core = self.lock();
        if core.generation != generation || core.state != ConnectionState::Connecting {
            return None;
        }

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        #[cfg(feature = "tracing")]
        if !core.queue.is_empty() {
            tracing::debug!(count = core.queue.len(), "Flushing queued messages");
        }

        for json in core.queue.drain(..) {
            _ = writer_tx.send(json);
        }
        core.writer = Some(writer_tx);
        core.reconnect_attempts = 0;
        core.backoff.reset();
        self.transition(&mut core, ConnectionState::Open);

        Some(writer_rx)
    }

    /// Read/write loop of an open session.
    async fn drive(
        self: &Arc<Self>,
        socket: BoxSocket,
        mut writer_rx: mpsc::UnboundedReceiver<String>,
        generation: u64,
        token: &CancellationToken,
    ) {
        let (mut write, mut read) = socket.split();
        let mut heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let exit = loop {
            tokio::select! {
                () = token.cancelled() => break Exit::Requested,

                // Handle incoming frames
                frame = read.next() => match frame {
                    Some(Ok(Frame::Text(text))) => self.handle_text(&text),
                    Some(Ok(Frame::Close)) | None => break Exit::Remote,
                    Some(Err(error)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %error, "WebSocket read error");

                        // The close that follows drives the transition
                        self.listeners.emit_error(&error);
                    }
                },

                // Handle outgoing envelopes, heartbeat pings included
                Some(json) = writer_rx.recv() => {
                    if let Err(error) = write.send(json).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %error, "WebSocket write failed");

                        self.listeners.emit_error(&error);
                        break Exit::Remote;
                    }
                }

                () = next_tick(&mut heartbeat) => self.heartbeat(generation),
            }
        };

        if matches!(exit, Exit::Requested) && self.is_closing(generation) {
            // Submitted while open: these precede the close
            while let Ok(json) = writer_rx.try_recv() {
                if write.send(json).await.is_err() {
                    break;
                }
            }
            self.close_gracefully(write, read).await;
        }

        self.finish(generation, Some(&mut writer_rx));
    }

    /// Ask the peer to close and wait for it to acknowledge.
    async fn close_gracefully(
        &self,
        mut write: SplitSink<BoxSocket, String>,
        mut read: SplitStream<BoxSocket>,
    ) {
        if let Err(error) = write.close().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %error, "Close handshake failed, dropping socket");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;
            return;
        }

        let acknowledged = timeout(self.config.close_timeout, async {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Frame::Text(text)) => self.handle_text(&text),
                    Ok(Frame::Close) | Err(_) => break,
                }
            }
        })
        .await;

        #[cfg(feature = "tracing")]
        if acknowledged.is_err() {
            tracing::debug!(
                timeout = ?self.config.close_timeout,
                "Peer did not acknowledge close, dropping socket"
            );
        }
        #[cfg(not(feature = "tracing"))]
        let _ = acknowledged;
    }

    fn is_closing(&self, generation: u64) -> bool {
        let core = self.lock();
        core.generation == generation && core.state == ConnectionState::Closing
    }

    /// The transport closed: -> Closed, then reconnect unless the close was requested.
    ///
    /// `unsent` holds envelopes accepted while open but never written; they go back to the
    /// front of the queue in their original order.
    fn finish(
        self: &Arc<Self>,
        generation: u64,
        unsent: Option<&mut mpsc::UnboundedReceiver<String>>,
    ) {
        {
            let mut core = self.lock();
            if core.generation != generation {
                return;
            }

            let requested = core.state == ConnectionState::Closing;
            core.writer = None;
            core.session = None;

            if let Some(unsent) = unsent {
                let mut pending = Vec::new();
                while let Ok(json) = unsent.try_recv() {
                    pending.push(json);
                }
                for json in pending.into_iter().rev() {
                    core.queue.push_front(json);
                }
            }

            self.transition(&mut core, ConnectionState::Closed);

            if !requested {
                self.schedule_reconnect(&mut core);
            }
        }

        self.listeners.emit_close();
    }

    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core) {
        let policy = &self.config.reconnect;
        if !policy.allows(core.reconnect_attempts) {
            #[cfg(feature = "tracing")]
            if policy.enabled {
                tracing::warn!(
                    attempts = core.reconnect_attempts,
                    "Reconnect attempts exhausted, staying closed"
                );
            }
            return;
        }

        let Some(delay) = core.backoff.next_backoff() else {
            return;
        };
        core.reconnect_attempts = core.reconnect_attempts.saturating_add(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempt = core.reconnect_attempts,
            delay = ?delay,
            "Scheduling reconnect"
        );

        let timer = CancellationToken::new();
        core.reconnect_timer = Some(timer.clone());

        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = sleep(delay) => shared.connect(Some(&timer)),
            }
        });
    }

    /// Send a `ping` through the normal send path, but only while this session is open.
    fn heartbeat(&self, generation: u64) {
        let mut core = self.lock();
        if core.generation != generation || !core.state.is_open() {
            return;
        }

        match serde_json::to_string(&Message::ping()) {
            Ok(json) => core.submit(json),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Unable to serialize heartbeat");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Parse an inbound frame and route every envelope in it.
    fn handle_text(&self, text: &str) {
        #[cfg(feature = "tracing")]
        if self.config.debug {
            tracing::trace!(%text, "Received WebSocket text message");
        }

        match parse_messages(text.as_bytes()) {
            Ok(messages) => {
                for message in messages {
                    if message.is_pong() {
                        continue;
                    }
                    for failure in self.router.dispatch(&message) {
                        self.listeners.emit_error(&failure);
                    }
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                trace_malformed(self.config.debug, text, &e);
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

/// Malformed frames are dropped; they are only reported in debug mode.
#[cfg(feature = "tracing")]
fn trace_malformed(debug: bool, text: &str, error: &crate::error::Error) {
    if debug {
        tracing::warn!(%text, %error, "Dropping malformed WebSocket message");
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
