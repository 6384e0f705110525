use std::pin::Pin;
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::error::WsError;
use super::traits::{BoxTransport, ConnectRequest, Connector};
use super::types::{CloseFrame, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default [`Connector`] backed by `tokio-tungstenite`, with `rustls` for `wss://`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<BoxTransport, WsError> {
        let mut handshake = request.url.as_str().into_client_request()?;

        if !request.protocols.is_empty() {
            let protocols = HeaderValue::from_str(&request.protocols.join(", "))
                .map_err(|e| WsError::Transport(format!("invalid sub-protocol list: {e}")))?;
            handshake
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, protocols);
        }

        let (stream, _response) = connect_async(handshake).await?;

        #[cfg(feature = "tracing")]
        tracing::trace!(url = %request.url, "WebSocket handshake completed");

        Ok(Box::new(TungsteniteTransport { inner: stream }))
    }
}

/// Adapts a tungstenite stream to [`Frame`]s. Ping/pong replies are left to tungstenite.
struct TungsteniteTransport {
    inner: WsStream,
}

impl Stream for TungsteniteTransport {
    type Item = Result<Frame, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes.to_vec()),
                Some(Ok(Message::Close(frame))) => Frame::Close(
                    frame.map(|f| CloseFrame::new(u16::from(f.code), f.reason.as_str())),
                ),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => return Poll::Ready(None),
            };

            return Poll::Ready(Some(Ok(frame)));
        }
    }
}

impl Sink<Frame> for TungsteniteTransport {
    type Error = WsError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.inner.poll_ready_unpin(cx).map_err(WsError::from)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: Frame) -> Result<(), WsError> {
        let message = match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(bytes) => Message::binary(bytes),
            Frame::Close(frame) => Message::Close(frame.map(|f| WsCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.into(),
            })),
        };

        self.inner.start_send_unpin(message).map_err(WsError::from)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.inner.poll_flush_unpin(cx).map_err(WsError::from)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.inner.poll_close_unpin(cx).map_err(WsError::from)
    }
}
