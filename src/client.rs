use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::sync::{mpsc, watch};

use crate::Result;
use crate::error::Error;
use crate::types::Message;
use crate::ws::config::Config;
use crate::ws::connection::{ConnectionManager, ConnectionState};
use crate::ws::router::{Listeners, ListenerHandle, Router, SubscriptionHandle};
use crate::ws::traits::Transport;
use crate::ws::transport::TungsteniteTransport;

/// Reconnecting real-time client for fleet telemetry and event pushes.
///
/// The client starts [`Closed`](ConnectionState::Closed); call [`connect`](Self::connect)
/// to open the channel. Messages sent while not open are queued and flushed in order on
/// the next open. Inbound messages are routed by their `type` to every handler
/// registered for that type and to every wildcard (`"*"`) handler.
///
/// Cloning is cheap and every clone drives the same connection. The connection is closed
/// when the last clone is dropped.
///
/// # Examples
///
/// ```rust, no_run
/// use std::time::Duration;
///
/// use fleet_realtime::{Client, Config, Message};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new(Config::new("wss://telemetry.fleet.example/live"))?;
///
///     let _locations = client.subscribe("vehicle_location", |message| {
///         println!("Location update: {:?}", message.payload);
///     });
///     let _errors = client.on_error(|error| eprintln!("Telemetry channel error: {error}"));
///
///     client.connect();
///     client.send(&Message::new("watch_vehicle", json!({ "vehicleId": "TRK-1042" })))?;
///
///     tokio::time::sleep(Duration::from_secs(60)).await;
///     client.disconnect();
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Configuration the connection was built from
    config: Config,
    /// Lifecycle, queue and heartbeat
    connection: ConnectionManager,
    /// Type-routed subscriptions
    router: Arc<Router>,
    /// Open/close/error listeners
    listeners: Arc<Listeners>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

impl Client {
    /// Create a client that connects with `tokio-tungstenite`.
    ///
    /// Fails if the URL is not a `ws://` or `wss://` URL, or if called outside a Tokio
    /// runtime. Does not connect.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_transport(config, TungsteniteTransport)
    }

    /// Create a client that opens its sockets through `transport`.
    pub fn with_transport<T: Transport>(config: Config, transport: T) -> Result<Self> {
        let router = Arc::new(Router::default());
        let listeners = Arc::new(Listeners::default());
        let connection = ConnectionManager::new(
            config.clone(),
            Arc::new(transport),
            Arc::clone(&router),
            Arc::clone(&listeners),
        )?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                connection,
                router,
                listeners,
            }),
        })
    }

    /// Open the connection. Returns immediately; observe the outcome through
    /// [`on_open`](Self::on_open), [`on_error`](Self::on_error) and
    /// [`on_close`](Self::on_close).
    ///
    /// Does nothing while already connecting or open. Cancels a pending automatic
    /// reconnect.
    pub fn connect(&self) {
        self.inner.connection.connect();
    }

    /// Close the connection.
    ///
    /// The heartbeat and any pending reconnect are cancelled before this returns. The
    /// state moves to [`Closing`](ConnectionState::Closing) and then to
    /// [`Closed`](ConnectionState::Closed) once the transport confirms.
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    /// Send a message, or queue it if the connection is not open.
    ///
    /// Never fails because the connection is down.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.inner.connection.send(message)
    }

    /// Register `handler` for messages whose `type` is `msg_type`.
    ///
    /// Use `"*"` to receive every message. The returned handle removes exactly this
    /// registration.
    pub fn subscribe<F>(&self, msg_type: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.router.insert(msg_type, Arc::new(handler))
    }

    /// Stream of messages of type `msg_type` (or every message for `"*"`).
    ///
    /// The subscription is removed when the stream is dropped.
    pub fn messages(&self, msg_type: &str) -> impl Stream<Item = Message> + Send + use<> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = self
            .subscribe(msg_type, move |message| {
                _ = tx.send(message.clone());
            })
            .into_guard();

        stream! {
            let _guard = guard;
            while let Some(message) = rx.recv().await {
                yield message;
            }
        }
    }

    /// Called every time the connection opens.
    pub fn on_open<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.add_open(Arc::new(callback))
    }

    /// Called every time the connection closes, including failed attempts.
    pub fn on_close<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.add_close(Arc::new(callback))
    }

    /// Called for transport errors and panicking subscription handlers.
    pub fn on_error<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.listeners.add_error(Arc::new(callback))
    }

    /// Whether the connection is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection_state().is_open()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Number of messages waiting for the next open.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.connection.queued_len()
    }

    /// Automatic reconnection attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.connection.reconnect_attempts()
    }

    /// Number of handlers registered under exactly `msg_type`.
    #[must_use]
    pub fn subscription_count(&self, msg_type: &str) -> usize {
        self.inner.router.handler_count(msg_type)
    }

    /// Number of message types (the wildcard included) that have at least one handler.
    #[must_use]
    pub fn subscribed_types(&self) -> usize {
        self.inner.router.type_count()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}
