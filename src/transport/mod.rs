//! Message transports.
//!
//! A transport turns a byte stream into discrete binary messages. The
//! session layer only sees whole messages and never the framing.
//!
//! - `tcp`: 4-byte big-endian length prefix per message
//! - `websocket`: one binary WebSocket message per RPC message

pub mod frame;
mod tcp;
mod websocket;

pub use tcp::FramedTransport;
pub use websocket::WsTransport;

use bytes::Bytes;
use std::future::Future;
use std::io;

/// A connection that delivers and consumes discrete binary messages.
pub trait MessageTransport: Send {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the peer disconnected cleanly.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;

    /// Send one message.
    fn send(&mut self, message: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Close the connection. No further I/O is attempted afterwards.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}
