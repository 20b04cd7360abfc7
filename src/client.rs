//! RPC client.
//!
//! Sends one request at a time over a [`MessageTransport`] and waits for the
//! response carrying the same id.

use crate::envelope::{EnvelopeError, EnvelopeFormat, Failure, Request, Response};
use crate::methods::reflector::{Timestamp, ACK};
use crate::transport::{FramedTransport, MessageTransport, WsTransport};
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use prost::{DecodeError, Message};
use std::io;
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_tungstenite::MaybeTlsStream;

/// Default upper bound on the size of a reply.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by server")]
    Closed,
    #[error("malformed reply envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("malformed reply payload: {0}")]
    Payload(#[from] DecodeError),
    #[error("reply id {actual} does not match request id {expected}")]
    UnexpectedId { expected: u64, actual: u64 },
    #[error("call failed: {0}")]
    Remote(Failure),
}

/// A connection to an RPC server.
pub struct Client<T> {
    transport: T,
    envelope: EnvelopeFormat,
    next_id: u64,
}

impl Client<FramedTransport<TcpStream>> {
    /// Connect over length-prefixed TCP.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let transport = FramedTransport::connect(addr, DEFAULT_MAX_MESSAGE_SIZE).await?;
        Ok(Self::new(transport))
    }
}

impl Client<WsTransport<MaybeTlsStream<TcpStream>>> {
    /// Connect over WebSocket, e.g. `ws://127.0.0.1:8088`.
    pub async fn connect_websocket(url: &str) -> Result<Self, ClientError> {
        let transport = WsTransport::connect(url, DEFAULT_MAX_MESSAGE_SIZE).await?;
        Ok(Self::new(transport))
    }
}

impl<T: MessageTransport> Client<T> {
    pub fn new(transport: T) -> Self {
        Client {
            transport,
            envelope: EnvelopeFormat::Binary,
            next_id: 1,
        }
    }

    /// Use `envelope` for requests and replies. Must match the server.
    pub fn with_envelope(mut self, envelope: EnvelopeFormat) -> Self {
        self.envelope = envelope;
        self
    }

    /// Direct access to the transport, bypassing request correlation.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Call `method` and decode its result.
    pub async fn call<Req, Res>(&mut self, method: &str, request: &Req) -> Result<Res, ClientError>
    where
        Req: Message,
        Res: Message + Default,
    {
        let id = self.next_id();
        let data = Bytes::from(request.encode_to_vec());
        let response = self.call_raw(&Request::new(method, id, data)).await?;

        match response.failure_detail() {
            None => Ok(Res::decode(response.data)?),
            Some(failure) => Err(ClientError::Remote(failure?)),
        }
    }

    /// Send a request envelope and wait for its response, failed or not.
    pub async fn call_raw(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.transport.send(self.envelope.encode_request(request)).await?;

        let reply = self.transport.recv().await?.ok_or(ClientError::Closed)?;
        let response = self.envelope.decode_response(&reply)?;
        if response.id != request.id {
            return Err(ClientError::UnexpectedId {
                expected: request.id,
                actual: response.id,
            });
        }

        Ok(response)
    }

    /// Round-trip latency measured with `Reflector.Service.ack`.
    pub async fn ping(&mut self) -> Result<TimeDelta, ClientError> {
        let sent = Utc::now();
        let echoed: Timestamp = self
            .call(
                ACK,
                &Timestamp {
                    timestamp: sent.timestamp_millis(),
                },
            )
            .await?;

        Ok(TimeDelta::milliseconds(
            Utc::now().timestamp_millis() - echoed.timestamp,
        ))
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.transport.close().await?;
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }
}
