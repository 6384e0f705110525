use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use url::Url;

use super::error::WsError;
use super::types::Payload;

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_HEARTBEAT_MESSAGE: &str = "ping";
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound for any backoff delay, regardless of attempt count.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Close code for a normal, intentional closure.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code sent by an endpoint that is going away (server shutdown, page navigation).
pub const GOING_AWAY: u16 = 1001;
/// Close code reported when a close frame carried no status.
pub const NO_STATUS: u16 = 1005;
/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Whether a close with `code` was intentional and must not trigger a reconnect.
#[must_use]
pub const fn is_intentional_close(code: u16) -> bool {
    matches!(code, NORMAL_CLOSE | GOING_AWAY)
}

/// Target address of a connection.
///
/// A [`UrlSource::Dynamic`] producer is invoked on every connection attempt, which supports
/// addresses that change between reconnects (rotating tokens, failover hosts).
#[derive(Clone)]
pub enum UrlSource {
    Fixed(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl UrlSource {
    pub fn dynamic<F>(producer: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(producer))
    }

    /// Resolve the address for a connection attempt and validate its scheme.
    pub fn resolve(&self) -> Result<Url, WsError> {
        let raw = match self {
            Self::Fixed(url) => url.clone(),
            Self::Dynamic(producer) => producer(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(WsError::InvalidUrl {
                url: raw,
                reason: "address is empty".to_owned(),
            });
        }

        let url = Url::parse(trimmed).map_err(|e| WsError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(WsError::InvalidUrl {
                url: raw,
                reason: format!("unsupported scheme `{scheme}`, expected `ws` or `wss`"),
            }),
        }
    }
}

impl fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(url) => f.debug_tuple("Fixed").field(url).finish(),
            Self::Dynamic(_) => f.debug_tuple("Dynamic").field(&"<fn>").finish(),
        }
    }
}

impl From<&str> for UrlSource {
    fn from(url: &str) -> Self {
        Self::Fixed(url.to_owned())
    }
}

impl From<String> for UrlSource {
    fn from(url: String) -> Self {
        Self::Fixed(url)
    }
}

/// Configuration for a [`Client`](super::Client) connection.
///
/// Built once and never mutated afterwards:
///
/// ```
/// use std::time::Duration;
/// use resilient_ws::ws::config::Config;
///
/// let config = Config::builder()
///     .url("wss://example.com/logs")
///     .reconnect_interval(Duration::from_secs(1))
///     .reconnect_attempts(5)
///     .heartbeat_interval(Duration::from_secs(10))
///     .parse_json(true)
///     .build();
/// # let _ = config;
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Target address, resolved at every connection attempt
    #[builder(into)]
    pub(crate) url: UrlSource,
    /// Whether the client connects as soon as it is created
    #[builder(default)]
    pub(crate) auto_connect: bool,
    /// Whether abnormal closures trigger automatic reconnection
    #[builder(default = true)]
    pub(crate) reconnect: bool,
    /// Base delay of the exponential reconnect backoff
    #[builder(default = DEFAULT_RECONNECT_INTERVAL)]
    pub(crate) reconnect_interval: Duration,
    /// Maximum number of automatic reconnect attempts. `None` retries forever.
    pub(crate) reconnect_attempts: Option<u32>,
    /// Sub-protocols offered in the `Sec-WebSocket-Protocol` header
    #[builder(default)]
    pub(crate) protocols: Vec<String>,
    /// Whether inbound text frames are parsed as JSON before delivery
    #[builder(default)]
    pub(crate) parse_json: bool,
    /// Period of the keep-alive message. Zero disables the heartbeat.
    #[builder(default)]
    pub(crate) heartbeat_interval: Duration,
    /// Payload sent on every heartbeat tick
    #[builder(default = Payload::from(DEFAULT_HEARTBEAT_MESSAGE), into)]
    pub(crate) heartbeat_message: Payload,
    /// How long a connection attempt may stay opening. Zero waits indefinitely.
    #[builder(default)]
    pub(crate) timeout: Duration,
    /// Whether a transport error schedules a reconnect right away instead of waiting for the
    /// backoff triggered by the close
    #[builder(default)]
    pub(crate) immediate_reconnect: bool,
}

impl Config {
    #[must_use]
    pub fn url(&self) -> &UrlSource {
        &self.url
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> Option<u32> {
        self.reconnect_attempts
    }

    /// Reconnect delay policy: the n-th delay is `min(reconnect_interval * 2^(n - 1), 30s)`.
    ///
    /// No jitter is applied, so the sequence is deterministic.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(self.reconnect_interval)
            .with_max_interval(MAX_RECONNECT_DELAY)
            .with_multiplier(BACKOFF_MULTIPLIER)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // Attempt ceiling is handled separately
            .build()
    }

    pub(crate) fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.reconnect_attempts.is_some_and(|max| attempts >= max)
    }
}
