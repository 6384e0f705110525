use serde::Serialize;
use serde_json::Value;

use super::config::{ABNORMAL_CLOSE, NORMAL_CLOSE};
use super::error::WsError;

/// Connection state tracking.
///
/// Exactly one value is active at a time. It is only ever changed by the connection task.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected, either initially, after a close or after [`disconnect`](super::Client::disconnect)
    #[default]
    Disconnected,
    /// A transport is being opened
    Connecting,
    /// The transport is open
    Connected,
    /// The last attempt or the open transport failed. A reconnect may follow.
    Error,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting)
    }
}

/// Outbound message body.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

/// Status and reason carried by a close frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn normal() -> Self {
        Self::new(NORMAL_CLOSE, "")
    }

    pub(crate) fn abnormal<S: Into<String>>(reason: S) -> Self {
        Self::new(ABNORMAL_CLOSE, reason)
    }
}

/// A single frame exchanged with a [`Transport`](super::Transport).
///
/// Control frames other than close are handled by the transport itself.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl From<Payload> for Frame {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Self::Text(text),
            Payload::Binary(bytes) => Self::Binary(bytes),
        }
    }
}

/// Inbound message as delivered to `on_message` and `message` listeners.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Text frame, either because JSON parsing is disabled or because it failed
    Text(String),
    Binary(Vec<u8>),
    /// Text frame successfully parsed as JSON
    Json(Value),
}

impl Message {
    /// Build a message from an inbound text frame, parsing it when `parse_json` is set.
    ///
    /// A frame that is not valid JSON is delivered unchanged as [`Message::Text`].
    pub(crate) fn from_text(text: String, parse_json: bool) -> Self {
        if !parse_json {
            return Self::Text(text);
        }

        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%text, error = %e, "Inbound message is not JSON, delivering raw text");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                Self::Text(text)
            }
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Event fanned out to listeners registered with [`Client::on`](super::Client::on).
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    Open,
    Message(Message),
    Error(WsError),
    Close(CloseFrame),
}

impl Event {
    pub const OPEN: &'static str = "open";
    pub const MESSAGE: &'static str = "message";
    pub const ERROR: &'static str = "error";
    pub const CLOSE: &'static str = "close";

    /// Listener channel this event is dispatched on.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open => Self::OPEN,
            Self::Message(_) => Self::MESSAGE,
            Self::Error(_) => Self::ERROR,
            Self::Close(_) => Self::CLOSE,
        }
    }
}
