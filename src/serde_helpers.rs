//! Serde helpers for envelope deserialization.
//!
//! When the `tracing` feature is enabled, failures carry the JSON path at which
//! deserialization stopped, which makes it easier to spot server-side schema drift.
//! Nothing is logged here; callers decide whether a failure is worth reporting.

use serde::de::DeserializeOwned;

use crate::ws::WsError;

/// Deserialize a complete JSON document from `bytes`, rejecting trailing data.
#[cfg(feature = "tracing")]
pub fn deserialize_envelope<T: DeserializeOwned>(bytes: &[u8]) -> crate::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value: T = serde_path_to_error::deserialize(&mut de).map_err(|path_err| {
        let path = path_err.path().to_string();
        WsError::MessageParse {
            path: Some(path),
            source: path_err.into_inner(),
        }
    })?;
    de.end().map_err(|source| WsError::MessageParse { path: None, source })?;

    Ok(value)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_envelope<T: DeserializeOwned>(bytes: &[u8]) -> crate::Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|source| WsError::MessageParse { path: None, source }.into())
}
