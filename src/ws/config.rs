#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use url::Url;

use crate::Result;
use crate::error::Error;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_CLOSE_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for the real-time client.
///
/// Fixed once handed to [`Client::new`](crate::Client::new).
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Sub-protocols offered in the `Sec-WebSocket-Protocol` header
    pub protocols: Vec<String>,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
    /// Interval for sending `ping` envelopes while open. `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// How long [`disconnect`](crate::Client::disconnect) waits for the server to
    /// acknowledge the close before dropping the socket
    pub close_timeout: Duration,
    /// Verbose logging of dropped frames and per-message traffic
    pub debug: bool,
}

impl Config {
    /// Default configuration for the given endpoint.
    #[must_use]
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL_DURATION),
            close_timeout: DEFAULT_CLOSE_TIMEOUT_DURATION,
            debug: false,
        }
    }

    /// Parse and check the endpoint URL.
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(Error::validation(format!(
                "unsupported url scheme `{scheme}`, expected ws or wss"
            ))),
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether an unexpected close schedules a new connection attempt
    pub enabled: bool,
    /// Base backoff unit. Attempt `n` (zero based) waits `interval * 2^n`.
    pub interval: Duration,
    /// Maximum number of reconnection attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Upper bound for a single backoff delay. `None` leaves the doubling uncapped.
    pub max_backoff: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_RECONNECT_INTERVAL_DURATION,
            max_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            max_backoff: None,
        }
    }
}

impl ReconnectConfig {
    /// Whether another automatic attempt fits in the budget after `attempts` attempts.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempts < max)
    }
}

impl From<&ReconnectConfig> for ExponentialBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.interval)
            .with_max_interval(config.max_backoff.unwrap_or(Duration::MAX))
            .with_multiplier(BACKOFF_MULTIPLIER)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}
