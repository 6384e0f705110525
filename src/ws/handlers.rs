use std::fmt;
use std::sync::Arc;

use super::error::WsError;
use super::types::{ConnectionState, Message};

type OpenCallback = Arc<dyn Fn() + Send + Sync>;
type CloseCallback = Arc<dyn Fn(u16, &str) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&WsError) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// The caller's current callback set.
///
/// Handed to [`Client::new`](super::Client::new) and replaced wholesale with
/// [`Client::set_handlers`](super::Client::set_handlers). Callbacks run on the connection task,
/// so they should return quickly.
///
/// ```
/// use resilient_ws::ws::Handlers;
///
/// let handlers = Handlers::new()
///     .on_open(|| println!("open"))
///     .on_close(|code, reason| println!("closed with {code}: {reason}"));
/// # let _ = handlers;
/// ```
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) open: Option<OpenCallback>,
    pub(crate) close: Option<CloseCallback>,
    pub(crate) error: Option<ErrorCallback>,
    pub(crate) message: Option<MessageCallback>,
    pub(crate) state_change: Option<StateCallback>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_open<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.open = Some(Arc::new(callback));
        self
    }

    /// Called with the close code and reason whenever a transport closes.
    #[must_use]
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(u16, &str) + Send + Sync + 'static,
    {
        self.close = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WsError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.message = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.state_change = Some(Arc::new(callback));
        self
    }

    pub(crate) fn opened(&self) {
        if let Some(callback) = &self.open {
            callback();
        }
    }

    pub(crate) fn closed(&self, code: u16, reason: &str) {
        if let Some(callback) = &self.close {
            callback(code, reason);
        }
    }

    pub(crate) fn failed(&self, error: &WsError) {
        if let Some(callback) = &self.error {
            callback(error);
        }
    }

    pub(crate) fn received(&self, message: &Message) {
        if let Some(callback) = &self.message {
            callback(message);
        }
    }

    pub(crate) fn state_changed(&self, state: ConnectionState) {
        if let Some(callback) = &self.state_change {
            callback(state);
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_open", &self.open.is_some())
            .field("on_close", &self.close.is_some())
            .field("on_error", &self.error.is_some())
            .field("on_message", &self.message.is_some())
            .field("on_state_change", &self.state_change.is_some())
            .finish()
    }
}
