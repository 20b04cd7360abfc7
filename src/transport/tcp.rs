//! Length-prefixed message transport over a byte stream.

use super::frame::{self, ParseResult, HEADER_LEN};
use super::MessageTransport;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Framed transport over any async byte stream (normally a `TcpStream`).
pub struct FramedTransport<S> {
    stream: S,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl<S> FramedTransport<S> {
    pub fn new(stream: S, max_frame_size: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            max_frame_size,
        }
    }
}

impl FramedTransport<TcpStream> {
    /// Connect to a framed TCP server.
    pub async fn connect(
        addr: impl tokio::net::ToSocketAddrs,
        max_frame_size: usize,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, max_frame_size))
    }
}

impl<S> MessageTransport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match frame::parse(&self.buffer, self.max_frame_size) {
                ParseResult::Complete(len) => {
                    self.buffer.advance(HEADER_LEN);
                    return Ok(Some(self.buffer.split_to(len).freeze()));
                }
                ParseResult::TooLarge(len) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame of {len} bytes exceeds limit of {}", self.max_frame_size),
                    ));
                }
                ParseResult::Incomplete => {}
            }

            if self.buffer.capacity() - self.buffer.len() < HEADER_LEN {
                self.buffer.reserve(BUFFER_SIZE);
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    // Connection closed
                    trace!("Connection closed by peer");
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
        }
    }

    async fn send(&mut self, message: Bytes) -> io::Result<()> {
        let mut output = BytesMut::new();
        frame::encode(&message, &mut output).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "message too large to frame")
        })?;
        self.stream.write_all(&output).await?;
        self.stream.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_recv_frames() {
        let mock = Builder::new()
            .read(b"\x00\x00\x00\x03abc\x00\x00")
            .read(b"\x00\x02de")
            .read(b"\x00\x00\x00\x00")
            .build();
        let mut transport = FramedTransport::new(mock, 1024);

        assert_eq!(transport.recv().await.unwrap().unwrap(), &b"abc"[..]);
        assert_eq!(transport.recv().await.unwrap().unwrap(), &b"de"[..]);
        assert_eq!(transport.recv().await.unwrap().unwrap(), &b""[..]);
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_frame() {
        let mock = Builder::new().write(b"\x00\x00\x00\x02hi").build();
        let mut transport = FramedTransport::new(mock, 1024);
        transport.send(Bytes::from_static(b"hi")).await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame() {
        let mock = Builder::new().read(b"\x00\x00\x10\x00").build();
        let mut transport = FramedTransport::new(mock, 1024);
        let err = transport.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let mock = Builder::new().read(b"\x00\x00\x00\x08abc").build();
        let mut transport = FramedTransport::new(mock, 1024);
        let err = transport.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
