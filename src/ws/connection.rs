//! The connection task: a single event loop that owns the transport, the outbound queue and
//! all three timers (connect timeout, heartbeat, reconnect delay).
//!
//! Every transport event and every command from a [`Client`](super::Client) handle is processed
//! here, one at a time, so the state machine needs no locking of its own.

use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::future::BoxFuture;
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout};

use super::config::{Config, MAX_RECONNECT_DELAY, NO_STATUS, is_intentional_close};
use super::error::WsError;
use super::handlers::Handlers;
use super::listener::ListenerRegistry;
use super::traits::{BoxTransport, ConnectRequest, Connector};
use super::types::{CloseFrame, ConnectionState, Event, Frame, Message, Payload};

/// How long a graceful close may take before the transport is dropped regardless.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared between the connection task and every client handle.
pub(crate) struct Shared {
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    /// Reconnect counter. Written by the connection task, read and reset by handles.
    pub(crate) attempts: AtomicU32,
    pub(crate) error: RwLock<Option<WsError>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            state_tx,
            listeners: Arc::new(ListenerRegistry::new()),
            attempts: AtomicU32::new(0),
            error: RwLock::new(None),
        }
    }

    pub(crate) fn error(&self) -> Option<WsError> {
        // Option<WsError> has no intermediate state, a poisoned lock is still consistent
        self.error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_error(&self, error: Option<WsError>) {
        *self.error.write().unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Commands sent from client handles to the connection task.
pub(crate) enum Command {
    Connect,
    Disconnect,
    Reconnect,
    ResetAttempts,
    Send(Payload),
    SetHandlers(Handlers),
}

/// Lifecycle of the single transport a connection may own.
///
/// Timers scoped to a phase live inside it, so leaving the phase cancels them.
enum Phase {
    Idle,
    Opening {
        attempt: BoxFuture<'static, Result<BoxTransport, WsError>>,
        deadline: Option<Pin<Box<Sleep>>>,
    },
    Open {
        transport: BoxTransport,
        heartbeat: Option<Interval>,
    },
}

enum Step {
    Command(Command),
    Opened(Result<BoxTransport, WsError>),
    TimedOut,
    Inbound(Option<Result<Frame, WsError>>),
    Heartbeat,
    Reconnect,
    Shutdown,
}

pub(crate) struct Connection {
    config: Config,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    handlers: Handlers,
    phase: Phase,
    queue: VecDeque<Payload>,
    /// Delay policy, advanced once per scheduled reconnect alongside the attempt counter
    backoff: ExponentialBackoff,
    /// Set by a caller-initiated disconnect so the resulting close is not reconnected
    manual: bool,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl Connection {
    pub(crate) fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
        handlers: Handlers,
    ) -> Self {
        let backoff = config.backoff();

        Self {
            config,
            connector,
            shared,
            commands,
            handlers,
            phase: Phase::Idle,
            queue: VecDeque::new(),
            backoff,
            manual: false,
            reconnect_timer: None,
        }
    }

    /// Main event loop. Returns once every client handle has been dropped.
    pub(crate) async fn run(mut self) {
        loop {
            match self.next_step().await {
                Step::Command(command) => self.handle_command(command).await,
                Step::Opened(Ok(transport)) => self.handle_open(transport).await,
                Step::Opened(Err(e)) => self.handle_error(e),
                Step::TimedOut => self.handle_error(WsError::ConnectTimeout(self.config.timeout)),
                Step::Inbound(Some(Ok(frame))) => self.handle_frame(frame).await,
                Step::Inbound(Some(Err(e))) => self.handle_error(e),
                Step::Inbound(None) => {
                    self.handle_close(CloseFrame::abnormal("connection dropped"));
                }
                Step::Heartbeat => self.send_heartbeat().await,
                Step::Reconnect => {
                    self.reconnect_timer = None;
                    if !self.manual {
                        self.open();
                    }
                }
                Step::Shutdown => {
                    self.teardown().await;
                    break;
                }
            }
        }
    }

    async fn next_step(&mut self) -> Step {
        tokio::select! {
            biased;

            command = self.commands.recv() => command.map_or(Step::Shutdown, Step::Command),
            step = phase_event(&mut self.phase) => step,
            () = armed(&mut self.reconnect_timer) => Step::Reconnect,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect().await,
            Command::Reconnect => {
                self.disconnect().await;
                self.reset_attempts();
                self.connect();
            }
            Command::ResetAttempts => self.reset_attempts(),
            Command::Send(payload) => self.send(payload).await,
            Command::SetHandlers(handlers) => self.handlers = handlers,
        }
    }

    fn connect(&mut self) {
        if matches!(self.phase, Phase::Open { .. }) {
            return;
        }

        self.manual = false;
        self.reconnect_timer = None;
        self.open();
    }

    /// Start a new transport attempt, replacing any attempt still in flight.
    fn open(&mut self) {
        // Dropping the previous phase discards its event source, a stale attempt can't report
        self.phase = Phase::Idle;

        let url = match self.config.url.resolve() {
            Ok(url) => url,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to resolve WebSocket address");
                self.set_state(ConnectionState::Error);
                self.report_error(e);
                return;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, attempt = self.shared.attempts.load(Ordering::SeqCst), "Connecting");

        let request = ConnectRequest {
            url,
            protocols: self.config.protocols.clone(),
        };
        let connector = Arc::clone(&self.connector);
        let attempt = Box::pin(async move { connector.connect(request).await });
        let deadline = (!self.config.timeout.is_zero()).then(|| Box::pin(sleep(self.config.timeout)));

        self.phase = Phase::Opening { attempt, deadline };
        self.set_state(ConnectionState::Connecting);
    }

    async fn handle_open(&mut self, transport: BoxTransport) {
        let heartbeat = (!self.config.heartbeat_interval.is_zero()).then(|| {
            let period = self.config.heartbeat_interval;
            let mut heartbeat = interval_at(Instant::now() + period, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat
        });

        self.phase = Phase::Open {
            transport,
            heartbeat,
        };
        self.set_state(ConnectionState::Connected);
        self.shared.set_error(None);
        self.reset_attempts();

        #[cfg(feature = "tracing")]
        tracing::debug!(queued = self.queue.len(), "WebSocket connection opened");

        while let Some(payload) = self.queue.pop_front() {
            if let Err(e) = self.transmit(payload.into()).await {
                self.handle_error(e);
                return;
            }
        }

        self.handlers.opened();
        self.shared.listeners.dispatch(&Event::Open);
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let message = match frame {
            Frame::Text(text) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%text, "Received WebSocket text message");
                Message::from_text(text, self.config.parse_json)
            }
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Close(frame) => {
                // Let the transport flush its close reply before it is dropped
                self.shutdown_transport().await;
                self.handle_close(frame.unwrap_or_else(|| CloseFrame::new(NO_STATUS, "")));
                return;
            }
        };

        self.shared
            .listeners
            .dispatch(&Event::Message(message.clone()));
        self.handlers.received(&message);
    }

    /// Error event: a failed attempt, a connect timeout or a broken open transport.
    ///
    /// The state stays `Error` through the close bookkeeping that follows, and at most one
    /// reconnect is scheduled for the failure.
    fn handle_error(&mut self, error: WsError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, "WebSocket error");

        let reason = error.to_string();
        self.phase = Phase::Idle;
        self.set_state(ConnectionState::Error);
        self.report_error(error);
        self.notify_closed(&CloseFrame::abnormal(reason));
        self.schedule_reconnect(self.config.immediate_reconnect);
    }

    fn handle_close(&mut self, frame: CloseFrame) {
        #[cfg(feature = "tracing")]
        tracing::debug!(code = frame.code, reason = %frame.reason, "WebSocket connection closed");

        self.phase = Phase::Idle;
        self.set_state(ConnectionState::Disconnected);
        self.notify_closed(&frame);

        if !is_intentional_close(frame.code) {
            self.schedule_reconnect(false);
        }
    }

    /// Arm the reconnect timer unless reconnection is off, the disconnect was manual or a
    /// reconnect is already pending.
    fn schedule_reconnect(&mut self, immediate: bool) {
        if !self.config.reconnect || self.manual || self.reconnect_timer.is_some() {
            return;
        }

        let attempts = self.shared.attempts.load(Ordering::SeqCst);
        if self.config.attempts_exhausted(attempts) {
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts, "Max reconnection attempts reached, giving up");
            self.report_error(WsError::MaxReconnectAttempts { attempts });
            return;
        }

        let attempt = attempts.saturating_add(1);
        self.shared.attempts.store(attempt, Ordering::SeqCst);

        // Advance the policy even for an immediate retry so it stays in step with the counter
        let backoff = self.backoff.next_backoff().unwrap_or(MAX_RECONNECT_DELAY);
        let delay = if immediate { Duration::ZERO } else { backoff };

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, ?delay, "Scheduling reconnect");

        self.reconnect_timer = Some(Box::pin(sleep(delay)));
    }

    async fn disconnect(&mut self) {
        self.manual = true;
        self.reconnect_timer = None;
        self.queue.clear();

        let was_open = self.close_transport().await;
        self.set_state(ConnectionState::Disconnected);

        if was_open {
            self.notify_closed(&CloseFrame::normal());
        }
    }

    async fn send(&mut self, payload: Payload) {
        if matches!(self.phase, Phase::Open { .. }) {
            if let Err(e) = self.transmit(payload.into()).await {
                self.handle_error(e);
            }
        } else if matches!(self.phase, Phase::Opening { .. }) {
            self.queue.push_back(payload);
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(len = payload.len(), "WebSocket is not connected, dropping message");
            #[cfg(not(feature = "tracing"))]
            let _ = &payload;
            self.shared.set_error(Some(WsError::NotConnected));
        }
    }

    async fn send_heartbeat(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::trace!("Sending heartbeat");

        let heartbeat = self.config.heartbeat_message.clone();
        if let Err(e) = self.transmit(heartbeat.into()).await {
            self.handle_error(e);
        }
    }

    async fn transmit(&mut self, frame: Frame) -> Result<(), WsError> {
        let Phase::Open { transport, .. } = &mut self.phase else {
            return Err(WsError::NotConnected);
        };

        transport.send(frame).await
    }

    /// Close an open transport with a normal closure, or abandon a pending attempt.
    ///
    /// Returns whether a transport was open.
    async fn close_transport(&mut self) -> bool {
        let Phase::Open { mut transport, .. } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return false;
        };

        let close = transport.send(Frame::Close(Some(CloseFrame::normal())));
        match timeout(CLOSE_TIMEOUT, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "Error while closing WebSocket");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Timed out while closing WebSocket");
            }
        }

        true
    }

    /// Close the transport of a connection the peer already closed. Returns once the close
    /// handshake completed or after [`CLOSE_TIMEOUT`].
    async fn shutdown_transport(&mut self) {
        let Phase::Open { mut transport, .. } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };

        if let Ok(Err(e)) = timeout(CLOSE_TIMEOUT, transport.close()).await {
            // Tungstenite reports the completed handshake as `ConnectionClosed`
            #[cfg(feature = "tracing")]
            tracing::trace!(error = %e, "WebSocket closed by peer");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    fn reset_attempts(&mut self) {
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.backoff.reset();
    }

    async fn teardown(&mut self) {
        self.manual = true;
        self.reconnect_timer = None;
        self.queue.clear();
        self.close_transport().await;
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        let changed = self.shared.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        if changed {
            #[cfg(feature = "tracing")]
            tracing::debug!(%state, "Connection state changed");
            self.handlers.state_changed(state);
        }
    }

    fn report_error(&self, error: WsError) {
        self.shared.set_error(Some(error.clone()));
        self.handlers.failed(&error);
        self.shared.listeners.dispatch(&Event::Error(error));
    }

    fn notify_closed(&self, frame: &CloseFrame) {
        self.handlers.closed(frame.code, &frame.reason);
        self.shared.listeners.dispatch(&Event::Close(frame.clone()));
    }
}

/// Next event produced by the current phase: the attempt resolving, its deadline, an inbound
/// frame or a heartbeat tick.
async fn phase_event(phase: &mut Phase) -> Step {
    match phase {
        Phase::Idle => pending().await,
        Phase::Opening { attempt, deadline } => {
            tokio::select! {
                biased;

                result = attempt => Step::Opened(result),
                () = armed(deadline) => Step::TimedOut,
            }
        }
        Phase::Open {
            transport,
            heartbeat,
        } => {
            tokio::select! {
                biased;

                frame = transport.next() => Step::Inbound(frame),
                () = tick(heartbeat) => Step::Heartbeat,
            }
        }
    }
}

async fn armed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(heartbeat) => {
            heartbeat.tick().await;
        }
        None => pending().await,
    }
}
