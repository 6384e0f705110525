//! Resilient WebSocket client.
//!
//! # Architecture
//!
//! - [`Client`]: handle to a background connection task that owns the reconnect/heartbeat state
//!   machine
//! - [`Connector`] / [`Transport`]: the seam to the underlying duplex stream, implemented by
//!   [`TungsteniteConnector`] by default
//! - [`ConnectionPool`]: reference-counted sharing of one client per URL
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new(config, Handlers::new().on_open(|| println!("open")))?;
//! let listener = client.on(Event::MESSAGE, |event| println!("{event:?}"));
//! client.connect();
//! client.send_json(&json!({ "subscribe": "logs" }))?;
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod pool;
pub mod traits;
pub mod transport;
pub mod types;

pub use client::Client;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use handlers::Handlers;
pub use listener::{ListenerHandle, ListenerId};
pub use pool::ConnectionPool;
pub use traits::*;
pub use transport::TungsteniteConnector;
pub use types::{CloseFrame, ConnectionState, Event, Frame, Message, Payload};
