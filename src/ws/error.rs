#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// WebSocket error variants.
///
/// Errors are recorded on the client and handed to every `on_error` callback and `error`
/// listener, so this type is cheaply [`Clone`]-able.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum WsError {
    /// The address could not be resolved into a usable `ws://` or `wss://` URL
    InvalidUrl {
        /// The address as resolved at connect time
        url: String,
        /// Why it was rejected
        reason: String,
    },
    /// Error connecting to or communicating with the WebSocket server
    Connection(Arc<tokio_tungstenite::tungstenite::Error>),
    /// Error reported by a custom [`Connector`](super::Connector) implementation
    Transport(String),
    /// The transport did not open within the configured connect timeout
    ConnectTimeout(Duration),
    /// The connection was already closed when it was read from or written to
    ConnectionClosed,
    /// A send was attempted while the connection was neither open nor opening
    NotConnected,
    /// The reconnect attempt ceiling was reached and no further attempts will be made
    MaxReconnectAttempts {
        /// Number of attempts that were made
        attempts: u32,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url, reason } => write!(f, "Invalid WebSocket URL {url:?}: {reason}"),
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Transport(reason) => write!(f, "WebSocket transport error: {reason}"),
            Self::ConnectTimeout(after) => {
                write!(f, "WebSocket connection timed out after {after:?}")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::NotConnected => write!(f, "WebSocket is not connected"),
            Self::MaxReconnectAttempts { attempts } => {
                write!(f, "Max reconnection attempts reached ({attempts})")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as Tungstenite;

        match e {
            Tungstenite::ConnectionClosed | Tungstenite::AlreadyClosed => Self::ConnectionClosed,
            e => Self::Connection(Arc::new(e)),
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}
