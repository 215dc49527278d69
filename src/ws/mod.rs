//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: lifecycle state machine, outbound queue, heartbeat and
//!   exponential-backoff reconnection
//! - [`Router`]: fans inbound messages out to handlers registered by message type
//! - [`Listeners`]: open, close and error callbacks
//! - [`Transport`]: opens the socket a connection runs on; [`TungsteniteTransport`] is
//!   the default
//!
//! [`Client`](crate::Client) wires these together and is the intended entry point.

pub mod config;
pub mod connection;
pub mod error;
pub mod router;
pub mod traits;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use router::{
    Handler, LifecycleEvent, ListenerHandle, Listeners, Router, SubscriptionGuard,
    SubscriptionHandle,
};
pub use traits::*;
pub use transport::TungsteniteTransport;
