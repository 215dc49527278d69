#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

pub use client::Client;
pub use types::Message;
pub use ws::ConnectionState;
pub use ws::config::{Config, ReconnectConfig};

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
