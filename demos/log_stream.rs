//! Streams log lines from a WebSocket endpoint, reconnecting whenever the server goes away.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,resilient_ws=debug cargo run --example log_stream --features tracing
//! ```
//!
//! The endpoint defaults to a public echo server and can be overridden with `LOG_STREAM_URL`.
//! Optionally log to a file with `LOG_FILE=log_stream.log`.

use std::fs::File;
use std::time::Duration;

use resilient_ws::ws::config::Config;
use resilient_ws::ws::{Client, Event, Handlers, Message};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_URL: &str = "wss://echo.websocket.org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let url = std::env::var("LOG_STREAM_URL").unwrap_or_else(|_| DEFAULT_URL.to_owned());

    let config = Config::builder()
        .url(url)
        .auto_connect(true)
        .parse_json(true)
        .reconnect_interval(Duration::from_secs(1))
        .reconnect_attempts(10)
        .heartbeat_interval(Duration::from_secs(15))
        .timeout(Duration::from_secs(10))
        .build();

    let handlers = Handlers::new()
        .on_open(|| info!("connected"))
        .on_close(|code, reason| warn!(code, reason, "connection closed"))
        .on_error(|e| error!(error = %e, "connection error"))
        .on_state_change(|state| info!(%state, "state changed"));

    let client = Client::new(config, handlers)?;

    let _lines = client.on(Event::MESSAGE, |event| {
        let Event::Message(message) = event else {
            return;
        };

        match message {
            Message::Json(value) => info!(level = %value["level"], line = %value["message"]),
            Message::Text(text) => info!(line = %text),
            Message::Binary(bytes) => info!(bytes = bytes.len(), "binary frame"),
            _ => {}
        }
    });

    // Queued until the connection opens, then flushed in order
    client.send_json(&json!({ "subscribe": "logs", "level": "info" }))?;

    tokio::time::sleep(Duration::from_secs(60)).await;

    info!(
        attempts = client.reconnect_attempts(),
        state = %client.state(),
        "shutting down"
    );
    client.disconnect();

    Ok(())
}
