use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use super::config::Config;
use super::connection::{Command, Connection, Shared};
use super::error::WsError;
use super::handlers::Handlers;
use super::listener::{ListenerHandle, ListenerId};
use super::traits::Connector;
use super::transport::TungsteniteConnector;
use super::types::{ConnectionState, Event, Payload};
use crate::Result;
use crate::error::{Error, Kind};

/// Resilient WebSocket client.
///
/// A [`Client`] is a cheap handle to a background connection task. The task creates, tears down
/// and recreates the underlying transport according to the [`Config`]: exponential backoff on
/// abnormal closure, heartbeat while connected, queueing of messages sent while the transport is
/// still opening. Listeners and handlers are attached to the client, not to a transport, and
/// survive reconnects.
///
/// Failures never surface from the methods below. They are observed through
/// [`Handlers::on_error`], `error` listeners, [`Client::error`] and the connection state.
///
/// Dropping the last handle closes the transport and stops the task.
///
/// # Example
///
/// ```rust,no_run
/// use resilient_ws::ws::{Client, Event, Handlers};
/// use resilient_ws::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> resilient_ws::Result<()> {
///     let config = Config::builder()
///         .url("wss://example.com/logs")
///         .parse_json(true)
///         .build();
///     let client = Client::new(config, Handlers::new())?;
///
///     let _listener = client.on(Event::MESSAGE, |event| println!("{event:?}"));
///     client.connect();
///     client.send("subscribe");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Create a client using the default `tokio-tungstenite` transport.
    ///
    /// Must be called from within a Tokio runtime. Connects right away when
    /// `auto_connect` is set.
    pub fn new(config: Config, handlers: Handlers) -> Result<Self> {
        Self::with_connector(config, handlers, TungsteniteConnector)
    }

    /// Create a client on top of a custom [`Connector`].
    pub fn with_connector<C: Connector>(
        config: Config,
        handlers: Handlers,
        connector: C,
    ) -> Result<Self> {
        Self::spawn(config, handlers, Arc::new(connector))
    }

    pub(crate) fn spawn(
        config: Config,
        handlers: Handlers,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::with_source(Kind::Internal, e))?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let auto_connect = config.auto_connect;

        let connection = Connection::new(
            config,
            connector,
            Arc::clone(&shared),
            command_rx,
            handlers,
        );
        runtime.spawn(connection.run());

        let client = Self {
            inner: Arc::new(ClientInner { shared, commands }),
        };

        if auto_connect {
            client.connect();
        }

        Ok(client)
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ClientInner> {
        Arc::downgrade(&self.inner)
    }

    /// Open the connection. No-op while connected.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection with a normal closure and stop reconnecting.
    ///
    /// Messages still queued are discarded. Calling this repeatedly has no further effect.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Manually reconnect: reset the attempt counter, close the current transport and connect
    /// again.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Send a message.
    ///
    /// Transmitted immediately when connected, queued while connecting and delivered once open,
    /// otherwise dropped with [`WsError::NotConnected`] recorded as the client's error.
    pub fn send<P: Into<Payload>>(&self, payload: P) {
        self.command(Command::Send(payload.into()));
    }

    /// Serialize `value` as JSON and [`send`](Self::send) it.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.send(json);
        Ok(())
    }

    /// Register a listener for `event` ([`Event::OPEN`], [`Event::MESSAGE`], [`Event::ERROR`] or
    /// [`Event::CLOSE`]).
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let listeners = &self.inner.shared.listeners;
        let id = listeners.add(event, Arc::new(listener));
        ListenerHandle::new(listeners, event, id)
    }

    /// Remove the listener `id` from `event`, or all of its listeners when `id` is `None`.
    ///
    /// Returns how many listeners were removed.
    pub fn off(&self, event: &str, id: Option<ListenerId>) -> usize {
        self.inner.shared.listeners.remove(event, id)
    }

    /// Replace the current callback set.
    pub fn set_handlers(&self, handlers: Handlers) {
        self.command(Command::SetHandlers(handlers));
    }

    /// Number of automatic reconnect attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.attempts.load(Ordering::SeqCst)
    }

    /// Reset the attempt counter and restart the backoff from the base interval.
    pub fn reset_reconnect_attempts(&self) {
        self.inner.shared.attempts.store(0, Ordering::SeqCst);
        self.command(Command::ResetAttempts);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state_tx.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    /// The most recent error, cleared by a successful open.
    #[must_use]
    pub fn error(&self) -> Option<WsError> {
        self.inner.shared.error()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state_tx.subscribe()
    }

    fn command(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connection task has stopped, ignoring command");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}
