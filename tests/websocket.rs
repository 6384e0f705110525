#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{listen, wait_for_state};
use futures_util::{SinkExt as _, StreamExt as _};
use resilient_ws::ws::config::Config;
use resilient_ws::ws::{Client, ConnectionState, Event, Handlers, Message, WsError};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

#[derive(Debug, Clone)]
enum ServerCommand {
    Send(String),
    Close(u16, String),
    /// Drop the TCP connection without a closing handshake
    Drop,
}

#[derive(Debug)]
enum ServerEvent {
    Connected { protocol: Option<String> },
    Received(WsMessage),
}

/// Mock WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    /// Commands applied to ALL connected clients
    command_tx: broadcast::Sender<ServerCommand>,
    /// Handshakes and every frame received from clients
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<ServerCommand>(100);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        let broadcast_tx = command_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let handshake_tx = event_tx.clone();
                // Echo the first offered sub-protocol back, like a server that supports them all
                let callback = move |request: &Request,
                                     mut response: Response|
                      -> Result<Response, ErrorResponse> {
                    let offered = request
                        .headers()
                        .get(SEC_WEBSOCKET_PROTOCOL)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);

                    if let Some(first) = offered.as_deref().and_then(|p| p.split(',').next()) {
                        response.headers_mut().insert(
                            SEC_WEBSOCKET_PROTOCOL,
                            HeaderValue::from_str(first.trim()).unwrap(),
                        );
                    }

                    drop(handshake_tx.send(ServerEvent::Connected { protocol: offered }));
                    Ok(response)
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let events = event_tx.clone();
                let mut commands = broadcast_tx.subscribe();

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(message)) => {
                                        let closing = message.is_close();
                                        drop(events.send(ServerEvent::Received(message)));
                                        if closing {
                                            break;
                                        }
                                    }
                                    _ => break,
                                }
                            }
                            command = commands.recv() => {
                                let message = match command {
                                    Ok(ServerCommand::Send(text)) => WsMessage::text(text),
                                    Ok(ServerCommand::Close(code, reason)) => {
                                        WsMessage::Close(Some(CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: reason.into(),
                                        }))
                                    }
                                    Ok(ServerCommand::Drop) | Err(_) => break,
                                };

                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            event_rx,
        }
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    fn send(&self, text: &str) {
        drop(self.command_tx.send(ServerCommand::Send(text.to_owned())));
    }

    fn close(&self, code: u16, reason: &str) {
        drop(
            self.command_tx
                .send(ServerCommand::Close(code, reason.to_owned())),
        );
    }

    fn drop_connections(&self) {
        drop(self.command_tx.send(ServerCommand::Drop));
    }

    /// Wait for the next client handshake and return the offered sub-protocols.
    async fn recv_handshake(&mut self) -> Option<Option<String>> {
        loop {
            match self.recv_event(Duration::from_secs(5)).await? {
                ServerEvent::Connected { protocol } => return Some(protocol),
                ServerEvent::Received(_) => {}
            }
        }
    }

    /// Receive the next frame sent by a client.
    async fn recv_message(&mut self) -> Option<WsMessage> {
        loop {
            match self.recv_event(Duration::from_secs(2)).await? {
                ServerEvent::Received(message) => return Some(message),
                ServerEvent::Connected { .. } => {}
            }
        }
    }

    /// Whether no client connects within `period`.
    async fn no_handshake_within(&mut self, period: Duration) -> bool {
        loop {
            match self.recv_event(period).await {
                None => return true,
                Some(ServerEvent::Connected { .. }) => return false,
                Some(ServerEvent::Received(_)) => {}
            }
        }
    }

    async fn recv_event(&mut self, period: Duration) -> Option<ServerEvent> {
        timeout(period, self.event_rx.recv()).await.ok().flatten()
    }
}

fn config(server: &MockWsServer) -> Config {
    Config::builder()
        .url(server.ws_url("/logs"))
        .reconnect_interval(Duration::from_millis(50))
        .build()
}

/// Wait until the server has registered the client's broadcast subscription.
async fn connected(server: &mut MockWsServer, client: &Client) {
    server.recv_handshake().await.unwrap();
    wait_for_state(client, ConnectionState::Connected).await;
    // The per-connection task subscribes right after the handshake completes
    sleep(Duration::from_millis(50)).await;
}

mod connection {
    use super::*;

    #[tokio::test]
    async fn connects_and_exchanges_messages() {
        let mut server = MockWsServer::start().await;
        let config = Config::builder()
            .url(server.ws_url("/logs"))
            .parse_json(true)
            .build();
        let client = Client::new(config, Handlers::new()).unwrap();
        let messages = listen(&client, Event::MESSAGE);

        client.connect();
        connected(&mut server, &client).await;

        client.send("subscribe");
        let received = server.recv_message().await.unwrap();
        assert_eq!(received.into_text().unwrap().as_str(), "subscribe");

        client
            .send_json(&json!({ "filter": { "level": "error" } }))
            .unwrap();
        let received = server.recv_message().await.unwrap();
        let value: serde_json::Value =
            serde_json::from_str(received.into_text().unwrap().as_str()).unwrap();
        assert_eq!(value, json!({ "filter": { "level": "error" } }));

        server.send(r#"{"level":"error","message":"disk full"}"#);
        server.send("plain text line");
        sleep(Duration::from_millis(100)).await;

        let messages: Vec<Message> = messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                Event::Message(message) => Some(message.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            messages,
            vec![
                Message::Json(json!({ "level": "error", "message": "disk full" })),
                Message::Text("plain text line".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn offers_configured_sub_protocols() {
        let mut server = MockWsServer::start().await;
        let config = Config::builder()
            .url(server.ws_url("/logs"))
            .protocols(vec!["logs.v2".to_owned(), "logs.v1".to_owned()])
            .build();
        let client = Client::new(config, Handlers::new()).unwrap();

        client.connect();

        let offered = server.recv_handshake().await.unwrap();
        assert_eq!(offered.as_deref(), Some("logs.v2, logs.v1"));
        wait_for_state(&client, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn disconnect_sends_normal_close() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(config(&server), Handlers::new()).unwrap();

        client.connect();
        connected(&mut server, &client).await;

        client.disconnect();
        wait_for_state(&client, ConnectionState::Disconnected).await;

        let Some(WsMessage::Close(Some(frame))) = server.recv_message().await else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, CloseCode::Normal);
        assert!(server.no_handshake_within(Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn heartbeat_reaches_server() {
        let mut server = MockWsServer::start().await;
        let config = Config::builder()
            .url(server.ws_url("/logs"))
            .heartbeat_interval(Duration::from_millis(50))
            .heartbeat_message("PING")
            .build();
        let client = Client::new(config, Handlers::new()).unwrap();

        client.connect();
        server.recv_handshake().await.unwrap();

        for _ in 0..2 {
            let received = server.recv_message().await.unwrap();
            assert_eq!(received, WsMessage::text("PING"));
        }
        drop(client);
    }
}

mod reconnection {
    use super::*;

    #[tokio::test]
    async fn reconnects_after_connection_drop() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(config(&server), Handlers::new()).unwrap();
        let opens = listen(&client, Event::OPEN);
        let messages = listen(&client, Event::MESSAGE);

        client.connect();
        connected(&mut server, &client).await;

        server.drop_connections();

        connected(&mut server, &client).await;
        assert_eq!(opens.lock().unwrap().len(), 2);
        assert_eq!(client.reconnect_attempts(), 0);

        // Listeners registered before the drop still receive messages
        server.send("after reconnect");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_normal_close_is_final() {
        let mut server = MockWsServer::start().await;
        let closes = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&closes);
        let handlers = Handlers::new().on_close(move |code, reason| {
            sink.lock().unwrap().push((code, reason.to_owned()));
        });
        let client = Client::new(config(&server), handlers).unwrap();

        client.connect();
        connected(&mut server, &client).await;

        server.close(1000, "shutting down");
        wait_for_state(&client, ConnectionState::Disconnected).await;

        // The client completes the closing handshake before letting go of the socket
        let Some(WsMessage::Close(Some(reply))) = server.recv_message().await else {
            panic!("expected the client to echo the close frame");
        };
        assert_eq!(reply.code, CloseCode::Normal);
        assert!(server.no_handshake_within(Duration::from_millis(300)).await);
        assert_eq!(
            closes.lock().unwrap().as_slice(),
            [(1000, "shutting down".to_owned())]
        );
    }

    #[tokio::test]
    async fn server_abnormal_close_reconnects() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(config(&server), Handlers::new()).unwrap();

        client.connect();
        connected(&mut server, &client).await;

        server.close(4000, "evicted");

        server.recv_handshake().await.unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn refused_connection_reports_error() {
        // Bind then release a port so nothing listens on it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config::builder()
            .url(format!("ws://{addr}/logs"))
            .reconnect(false)
            .build();
        let client = Client::new(config, Handlers::new()).unwrap();
        let errors = listen(&client, Event::ERROR);

        client.connect();
        wait_for_state(&client, ConnectionState::Error).await;

        assert!(matches!(client.error(), Some(WsError::Connection(_))));
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            Event::Error(WsError::Connection(e)) if matches!(**e, tungstenite::Error::Io(_))
        ));
    }
}
