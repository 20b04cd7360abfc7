//! WebSocket message transport.
//!
//! Each RPC message travels as one binary WebSocket message. Text messages
//! are ignored; pings are answered by tungstenite on the next read or write.
//! The message size limit is enforced by tungstenite while reading frame
//! headers, before the payload is buffered.

use super::MessageTransport;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;

/// WebSocket transport wrapping a [`WebSocketStream`].
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

/// Limits both single frames and reassembled messages to `max_message_size`.
fn config(max_message_size: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(max_message_size))
        .max_frame_size(Some(max_message_size))
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Perform the server side of the WebSocket handshake.
    pub async fn accept(stream: S, max_message_size: usize) -> io::Result<Self> {
        let stream =
            tokio_tungstenite::accept_async_with_config(stream, Some(config(max_message_size)))
                .await
                .map_err(io::Error::other)?;
        Ok(Self::new(stream))
    }
}

impl WsTransport<MaybeTlsStream<TcpStream>> {
    /// Connect to a WebSocket server, e.g. `ws://127.0.0.1:8088`.
    pub async fn connect(url: &str, max_message_size: usize) -> io::Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async_with_config(
            url,
            Some(config(max_message_size)),
            true,
        )
        .await
        .map_err(io::Error::other)?;
        Ok(Self::new(stream))
    }
}

impl<S> MessageTransport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(Some(data)),
                Some(Ok(WsMessage::Text(_))) => {
                    trace!("Ignoring text message");
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Err(WsError::ConnectionClosed))
                | Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                    return Ok(None);
                }
                Some(Err(WsError::Capacity(e))) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
                Some(Err(e)) => return Err(io::Error::other(e)),
            }
        }
    }

    async fn send(&mut self, message: Bytes) -> io::Result<()> {
        self.stream
            .send(WsMessage::Binary(message))
            .await
            .map_err(io::Error::other)
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}
