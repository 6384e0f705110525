#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every integration test binary uses every helper"
)]

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, Stream};
use resilient_ws::ws::{
    BoxTransport, Client, CloseFrame, ConnectRequest, ConnectionState, Connector, Event, Frame,
    Handlers, Message, WsError,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout};

/// Upper bound for waiting on anything that should happen. Generous because tests run with
/// paused time, where waiting is free.
pub const WAIT: Duration = Duration::from_secs(60);

/// Create a connector for a [`Client`] and the server side that controls its attempts.
#[must_use]
pub fn mock() -> (MockConnector, MockServer) {
    let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();

    (
        MockConnector {
            attempts: attempts_tx,
        },
        MockServer {
            attempts: attempts_rx,
        },
    )
}

pub struct MockConnector {
    attempts: mpsc::UnboundedSender<PendingAttempt>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<BoxTransport, WsError> {
        let (reply, response) = oneshot::channel();

        self.attempts
            .send(PendingAttempt {
                request,
                at: Instant::now(),
                reply,
            })
            .map_err(|_e| WsError::Transport("mock server is gone".to_owned()))?;

        let transport = response
            .await
            .map_err(|_e| WsError::Transport("attempt was abandoned".to_owned()))??;

        Ok(Box::new(transport))
    }
}

pub struct MockServer {
    attempts: mpsc::UnboundedReceiver<PendingAttempt>,
}

impl MockServer {
    /// Wait for the client's next connection attempt.
    pub async fn next_attempt(&mut self) -> PendingAttempt {
        timeout(WAIT, self.attempts.recv())
            .await
            .expect("client should make another connection attempt")
            .expect("connector should still be alive")
    }

    /// Whether the client stays quiet for `period`.
    pub async fn no_attempt_within(&mut self, period: Duration) -> bool {
        !matches!(timeout(period, self.attempts.recv()).await, Ok(Some(_)))
    }
}

/// A connection attempt that the test decides to accept or reject.
///
/// Dropping it without answering fails the attempt.
pub struct PendingAttempt {
    pub request: ConnectRequest,
    /// When the client started this attempt
    pub at: Instant,
    reply: oneshot::Sender<Result<MockTransport, WsError>>,
}

impl PendingAttempt {
    pub fn accept(self) -> Peer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let transport = MockTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        drop(self.reply.send(Ok(transport)));

        Peer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        }
    }

    pub fn reject(self, reason: &str) {
        drop(self.reply.send(Err(WsError::Transport(reason.to_owned()))));
    }
}

/// Server end of an accepted mock transport. Dropping it drops the connection without a close
/// frame.
pub struct Peer {
    inbound: mpsc::UnboundedSender<Result<Frame, WsError>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
}

impl Peer {
    pub fn send_text(&self, text: &str) {
        drop(self.inbound.send(Ok(Frame::Text(text.to_owned()))));
    }

    pub fn close(&self, code: u16, reason: &str) {
        drop(
            self.inbound
                .send(Ok(Frame::Close(Some(CloseFrame::new(code, reason))))),
        );
    }

    pub fn fail(&self, reason: &str) {
        drop(self.inbound.send(Err(WsError::Transport(reason.to_owned()))));
    }

    /// Next frame sent by the client, `None` once the client dropped the transport.
    pub async fn recv(&mut self) -> Option<Frame> {
        timeout(WAIT, self.outbound.recv())
            .await
            .expect("client should send a frame or close the transport")
    }

    /// Every frame the client sends until it drops the transport.
    pub async fn recv_all(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.recv().await {
            frames.push(frame);
        }
        frames
    }
}

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Result<Frame, WsError>>,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl Stream for MockTransport {
    type Item = Result<Frame, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx)
    }
}

impl Sink<Frame> for MockTransport {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> Result<(), WsError> {
        self.outbound
            .send(frame)
            .map_err(|_e| WsError::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }
}

/// Everything the client reported through its [`Handlers`].
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    Open,
    Close(u16, String),
    Error(String),
    Message(Message),
    State(ConnectionState),
}

/// Handlers that forward every callback into a channel.
#[must_use]
pub fn recording_handlers() -> (Handlers, mpsc::UnboundedReceiver<Callback>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let open = tx.clone();
    let close = tx.clone();
    let error = tx.clone();
    let message = tx.clone();
    let state = tx;

    let handlers = Handlers::new()
        .on_open(move || drop(open.send(Callback::Open)))
        .on_close(move |code, reason| drop(close.send(Callback::Close(code, reason.to_owned()))))
        .on_error(move |e| drop(error.send(Callback::Error(e.to_string()))))
        .on_message(move |m| drop(message.send(Callback::Message(m.clone()))))
        .on_state_change(move |s| drop(state.send(Callback::State(s))));

    (handlers, rx)
}

/// Drain everything recorded so far.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Collect events dispatched to listeners of `event`.
#[must_use]
pub fn listen(client: &Client, event: &str) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _handle = client.on(event, move |event| sink.lock().unwrap().push(event.clone()));
    events
}

pub async fn wait_for_state(client: &Client, state: ConnectionState) {
    let mut rx = client.state_receiver();
    timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .expect("state should be reached in time")
        .expect("connection task should be alive");
}

/// Give the connection task a chance to process everything sent to it so far.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn assert_elapsed(from: Instant, to: Instant, expected: Duration) {
    let elapsed = to.duration_since(from);
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(5),
        "expected {expected:?} between attempts, got {elapsed:?}"
    );
}
