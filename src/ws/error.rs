#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// An inbound frame is not a valid envelope
    MessageParse {
        /// JSON path at which deserialization stopped, when known
        path: Option<String>,
        /// Underlying JSON error
        source: serde_json::Error,
    },
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Transport-level failure reported by a non-tungstenite transport
    Transport(String),
    /// A subscription handler panicked while processing a message
    HandlerPanicked {
        /// Type of the message being dispatched
        msg_type: String,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse {
                path: Some(path),
                source,
            } => write!(f, "Failed to parse WebSocket message at `{path}`: {source}"),
            Self::MessageParse { path: None, source } => {
                write!(f, "Failed to parse WebSocket message: {source}")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Transport(reason) => write!(f, "WebSocket transport error: {reason}"),
            Self::HandlerPanicked { msg_type } => {
                write!(f, "Subscription handler panicked on `{msg_type}` message")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
