//! Wire envelope shared by every message that crosses the real-time channel.
//!
//! Every frame carries a JSON object of the form
//! `{ "type": string, "payload": any, "timestamp": ISO-8601 string }`.
//! The `type` field is the routing key used by [`Client::subscribe`](crate::Client::subscribe).
//! The timestamp is kept as sent; an envelope is never dropped because of its timestamp.

use bon::Builder;
/// Date and time types used for envelope timestamps.
pub use chrono::{DateTime, Utc};
use chrono::{NaiveDateTime, SecondsFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
/// Untyped JSON payload carried by every envelope.
pub use serde_json::Value;

use crate::serde_helpers::deserialize_envelope;

/// Outbound liveness probe sent by the heartbeat.
pub const PING: &str = "ping";
/// Inbound liveness acknowledgement. Consumed by the client, never dispatched.
pub const PONG: &str = "pong";
/// Subscription key whose handlers receive every inbound message.
pub const WILDCARD: &str = "*";

/// A single real-time message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct Message {
    /// Routing key (e.g. `vehicle_location`, `geofence_alert`)
    #[serde(rename = "type")]
    #[builder(into)]
    pub msg_type: String,
    /// Event-specific data object
    #[serde(default)]
    #[builder(default)]
    pub payload: Value,
    /// When the message was produced, as sent on the wire (empty if absent)
    #[serde(default)]
    #[builder(into, default = now())]
    pub timestamp: String,
}

/// Offset-less layouts accepted by [`Message::timestamp_utc`], read as UTC.
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y%m%dT%H%M%S%.f"];

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new<S: Into<String>>(msg_type: S, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
            timestamp: now(),
        }
    }

    /// The timestamp as a UTC instant.
    ///
    /// Accepts RFC 3339 and ISO 8601 date-times without an offset (extended or basic
    /// format, optional trailing `Z`), the latter read as UTC. Returns `None` when the
    /// timestamp is missing or in any other form.
    #[must_use]
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(parsed.with_timezone(&Utc));
        }

        let naive = self.timestamp.strip_suffix('Z').unwrap_or(&self.timestamp);
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
            .map(|parsed| parsed.and_utc())
    }

    /// The heartbeat message: `{"type":"ping","payload":null,"timestamp":now}`.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(PING, Value::Null)
    }

    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.msg_type == PING
    }

    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.msg_type == PONG
    }

    /// Try to extract the payload as a concrete type.
    ///
    /// Returns `None` if the payload does not match the shape of `T`.
    #[must_use]
    pub fn payload_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Deserialize messages from the byte slice.
///
/// Handles both single envelopes and arrays of envelopes (batched pushes).
/// Returns an empty vector for empty or whitespace-only input.
pub fn parse_messages(bytes: &[u8]) -> crate::Result<Vec<Message>> {
    // Whitespace-only frames are server keepalives
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.first() == Some(&b'[') {
        deserialize_envelope(trimmed)
    } else {
        let msg: Message = deserialize_envelope(trimmed)?;
        Ok(vec![msg])
    }
}
