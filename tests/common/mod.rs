#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use fleet_realtime::error::{Error, Kind};
use fleet_realtime::ws::{BoxSocket, Frame, Transport, WsError};
use fleet_realtime::{Client, Config};
use futures::{Sink, Stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

pub const ENDPOINT: &str = "ws://fleet.test/live";

/// Let spawned tasks run and advance paused time by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A wire envelope as the server would push it.
#[must_use]
pub fn envelope(msg_type: &str, payload: Value) -> Value {
    serde_json::json!({
        "type": msg_type,
        "payload": payload,
        "timestamp": "2026-01-01T12:00:00Z"
    })
}

/// Config pointing at the in-memory transport, with a 1 second backoff unit and no
/// heartbeat.
#[must_use]
pub fn config() -> Config {
    let mut config = Config::new(ENDPOINT);
    config.heartbeat_interval = None;
    config.reconnect.interval = Duration::from_millis(1000);
    config
}

/// Client over a fresh [`MockTransport`], plus the server side of that transport.
pub fn client(config: Config) -> (Client, MockServer) {
    let (transport, server) = MockTransport::pair();
    let client = Client::with_transport(config, transport).unwrap();
    (client, server)
}

#[derive(Default)]
struct Control {
    refuse: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<Instant>>,
}

/// In-memory transport. Every opened socket shows up on the paired [`MockServer`].
pub struct MockTransport {
    control: Arc<Control>,
    accepted: mpsc::UnboundedSender<ServerConnection>,
}

impl MockTransport {
    #[must_use]
    pub fn pair() -> (Self, MockServer) {
        let control = Arc::new(Control::default());
        let (accepted, connections) = mpsc::unbounded_channel();
        let transport = Self {
            control: Arc::clone(&control),
            accepted,
        };
        (
            transport,
            MockServer {
                control,
                connections,
            },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &Url, _protocols: &[String]) -> fleet_realtime::Result<BoxSocket> {
        self.control.attempts.lock().unwrap().push(Instant::now());

        let delay = *self.control.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.control.refuse.load(Ordering::SeqCst) {
            return Err(WsError::Transport("connection refused".to_owned()).into());
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        _ = self.accepted.send(ServerConnection {
            to_client,
            from_client,
        });

        Ok(Box::new(MockSocket { incoming, outgoing }))
    }
}

/// Client end of an in-memory connection.
struct MockSocket {
    incoming: mpsc::UnboundedReceiver<fleet_realtime::Result<Frame>>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl Stream for MockSocket {
    type Item = fleet_realtime::Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_recv(cx)
    }
}

impl Sink<String> for MockSocket {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), Error> {
        self.outgoing
            .send(item)
            .map_err(|_closed| Error::from(WsError::ConnectionClosed))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }

    // The peer acknowledges immediately: buffered frames drain, then the stream ends
    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        self.incoming.close();
        Poll::Ready(Ok(()))
    }
}

/// Test-side controls and the connections the client opened.
pub struct MockServer {
    control: Arc<Control>,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MockServer {
    /// Fail every following open with a transport error.
    pub fn refuse(&self, refuse: bool) {
        self.control.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Hold every following open for `delay` before it resolves.
    pub fn delay_open(&self, delay: Duration) {
        *self.control.open_delay.lock().unwrap() = Some(delay);
    }

    /// Times at which the client started a connection attempt.
    #[must_use]
    pub fn attempts(&self) -> Vec<Instant> {
        self.control.attempts.lock().unwrap().clone()
    }

    /// Gaps between consecutive attempts.
    #[must_use]
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        self.attempts()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> ServerConnection {
        self.connections.recv().await.unwrap()
    }

    /// A connection that is already accepted, if any.
    pub fn try_accept(&mut self) -> Option<ServerConnection> {
        self.connections.try_recv().ok()
    }
}

/// Server end of an in-memory connection.
pub struct ServerConnection {
    to_client: mpsc::UnboundedSender<fleet_realtime::Result<Frame>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerConnection {
    /// Push a raw text frame.
    pub fn push(&self, text: &str) {
        _ = self.to_client.send(Ok(Frame::Text(text.to_owned())));
    }

    /// Push a JSON value as a text frame.
    pub fn push_json(&self, value: &Value) {
        self.push(&value.to_string());
    }

    /// Deliver a read error to the client.
    pub fn fail(&self, reason: &str) {
        _ = self.to_client.send(Err(Error::with_source(
            Kind::WebSocket,
            WsError::Transport(reason.to_owned()),
        )));
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        _ = self.to_client.send(Ok(Frame::Close));
    }

    /// Everything the client wrote so far.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut received = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            received.push(serde_json::from_str(&text).unwrap());
        }
        received
    }

    /// The `type` of everything the client wrote so far.
    pub fn drain_types(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .map(|envelope| envelope["type"].as_str().unwrap().to_owned())
            .collect()
    }

    /// Whether the client dropped its end of the socket.
    pub fn is_closed_by_client(&self) -> bool {
        self.to_client.is_closed()
    }
}
