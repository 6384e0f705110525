//! Core traits for the transport behind a [`Client`](super::Client).
//!
//! The client owns the reconnect/heartbeat state machine and only needs a way to open a duplex
//! frame stream. Anything that can produce one can stand in for the default
//! [`TungsteniteConnector`](super::transport::TungsteniteConnector).

use async_trait::async_trait;
use futures::{Sink, Stream};
use url::Url;

use super::error::WsError;
use super::types::Frame;

/// An open duplex connection.
///
/// Reading yields inbound frames in the order the peer sent them. The stream ending without a
/// [`Frame::Close`] is treated as an abnormal closure.
pub trait Transport:
    Stream<Item = Result<Frame, WsError>> + Sink<Frame, Error = WsError> + Send + Unpin
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Frame, WsError>> + Sink<Frame, Error = WsError> + Send + Unpin
{
}

pub type BoxTransport = Box<dyn Transport>;

/// Everything a [`Connector`] needs to open one transport.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Address resolved and validated for this attempt
    pub url: Url,
    /// Sub-protocols to offer during the handshake
    pub protocols: Vec<String>,
}

/// Opens transports on behalf of the connection task.
///
/// # Example
///
/// ```ignore
/// struct Loopback;
///
/// #[async_trait]
/// impl Connector for Loopback {
///     async fn connect(&self, request: ConnectRequest) -> Result<BoxTransport, WsError> {
///         Ok(Box::new(open_loopback(request.url).await?))
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport. The returned future resolving is the `open` event, an error is the
    /// `error` event of a failed attempt.
    async fn connect(&self, request: ConnectRequest) -> Result<BoxTransport, WsError>;
}
