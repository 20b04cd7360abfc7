//! Per-connection session.
//!
//! A session owns one transport connection and handles its messages one at
//! a time: decode the request envelope, dispatch it through the method
//! registry, and send the correlated response on the same connection.
//!
//! Every failure after the envelope has been decoded (unknown method,
//! malformed payload, handler error) becomes a failed response carrying the
//! request id. Envelope decode failures follow the configured
//! [`DecodeErrorPolicy`].

use crate::config::{DecodeErrorPolicy, SessionOptions};
use crate::envelope::{EnvelopeError, Failure, FailureKind, Response};
use crate::registry::MethodRegistry;
use crate::shutdown::Shutdown;
use crate::transport::MessageTransport;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Can receive and send.
    Open,
    /// Terminal. No further I/O is attempted.
    Closed,
}

/// What the connection loop should do after a message.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Send these bytes back to the peer.
    Reply(Bytes),
    /// Nothing to send.
    Ignore,
    /// Close the connection.
    Close,
}

/// State for one client connection.
pub struct Session {
    id: usize,
    peer: SocketAddr,
    state: SessionState,
    registry: Arc<MethodRegistry>,
    options: SessionOptions,
}

impl Session {
    pub fn new(
        id: usize,
        peer: SocketAddr,
        registry: Arc<MethodRegistry>,
        options: SessionOptions,
    ) -> Self {
        Self {
            id,
            peer,
            state: SessionState::Open,
            registry,
            options,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Transition to `Closed`.
    pub fn close(&mut self) {
        if self.state == SessionState::Open {
            trace!(conn_id = self.id, "Session closed");
            self.state = SessionState::Closed;
        }
    }

    /// Handle one inbound message.
    pub fn handle_message(&mut self, message: &[u8]) -> Outcome {
        if !self.is_open() {
            return Outcome::Ignore;
        }

        if self.options.log_messages {
            debug!(conn_id = self.id, bytes = message.len(), ?message, "Received message");
        }

        let format = self.options.envelope;
        let request = match format.decode_request(message) {
            Ok(request) => request,
            Err(e) => return self.reject(message, e),
        };

        trace!(conn_id = self.id, method = %request.name, id = request.id, "Dispatching");

        let response = match self.registry.dispatch(&request.name, &request.data) {
            Ok(data) => Response::success(request.id, data),
            Err(e) => {
                debug!(conn_id = self.id, id = request.id, error = %e, "Call failed");
                Response::failure(request.id, &Failure::new(e.kind(), e.to_string()))
            }
        };

        Outcome::Reply(format.encode_response(&response))
    }

    fn reject(&mut self, message: &[u8], error: EnvelopeError) -> Outcome {
        warn!(
            conn_id = self.id,
            peer = %self.peer,
            bytes = message.len(),
            error = %error,
            "Malformed request envelope"
        );

        match self.options.on_decode_error {
            DecodeErrorPolicy::Reply => match self.options.envelope.salvage_id(message) {
                Some(id) => {
                    let failure = Failure::new(
                        FailureKind::Decode,
                        format!("malformed request: {error}"),
                    );
                    let response = Response::failure(id, &failure);
                    Outcome::Reply(self.options.envelope.encode_response(&response))
                }
                None => Outcome::Ignore,
            },
            DecodeErrorPolicy::Drop => Outcome::Ignore,
            DecodeErrorPolicy::Close => {
                self.close();
                Outcome::Close
            }
        }
    }

    /// Serve the connection until the peer disconnects, the transport fails,
    /// the decode-error policy closes it, or shutdown is signalled.
    ///
    /// The session is `Closed` and the transport closed on return.
    pub async fn run<T: MessageTransport>(
        mut self,
        mut transport: T,
        mut shutdown: Shutdown,
    ) -> io::Result<()> {
        debug!(conn_id = self.id, peer = %self.peer, "Session opened");

        let result = loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    debug!(conn_id = self.id, "Closing session for shutdown");
                    break Ok(());
                }
                received = transport.recv() => received,
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            match self.handle_message(&message) {
                Outcome::Reply(response) => {
                    // a peer that stops reading must not stall shutdown
                    let sent = tokio::select! {
                        _ = shutdown.recv() => {
                            debug!(conn_id = self.id, "Closing session for shutdown");
                            break Ok(());
                        }
                        sent = transport.send(response) => sent,
                    };
                    if let Err(e) = sent {
                        break Err(e);
                    }
                }
                Outcome::Ignore => {}
                Outcome::Close => break Ok(()),
            }
        };

        self.close();
        tokio::select! {
            biased;
            closed = transport.close() => {
                if let Err(e) = closed {
                    trace!(conn_id = self.id, error = %e, "Error closing transport");
                }
            }
            _ = shutdown.recv() => {
                trace!(conn_id = self.id, "Abandoned transport close for shutdown");
            }
        }
        debug!(conn_id = self.id, peer = %self.peer, "Session ended");

        result
    }
}
