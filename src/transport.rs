//! Pluggable duplex byte-stream transport.
//!
//! The driver treats the stream as opaque bytes; anything implementing
//! `AsyncRead + AsyncWrite` can back a connection, which is also how the
//! tests drive the state machine without a server.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{PgError, PgResult};

/// Object-safe alias for the duplex byte streams a connection can own.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Upgrades a plaintext stream to TLS after the server accepts SSLRequest.
///
/// The driver issues the handshake request and hands the raw stream over;
/// the actual negotiation is the upgrader's business.
pub trait TlsUpgrader: Send + Sync {
    fn upgrade<'a>(
        &'a self,
        stream: Box<dyn Duplex>,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Box<dyn Duplex>>> + Send + 'a>>;
}

/// A connection's transport: one duplex stream plus the default I/O timeout.
///
/// Reads and writes are full-buffer operations under a timeout; exceeding
/// the timeout fails the operation (the connection then goes fatal).
pub struct Transport {
    stream: Box<dyn Duplex>,
    io_timeout: Option<Duration>,
}

impl Transport {
    /// Open a TCP transport to the given host and port.
    pub async fn connect(host: &str, port: u16, io_timeout: Option<Duration>) -> PgResult<Self> {
        let addr = format!("{}:{}", host, port);
        let connect = TcpStream::connect(&addr);
        let stream = match io_timeout {
            Some(t) => tokio::time::timeout(t, connect)
                .await
                .map_err(|_| PgError::TransportTimeout)??,
            None => connect.await?,
        };
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(Box::new(stream), io_timeout))
    }

    /// Wrap an existing duplex stream (TLS-upgraded socket, in-memory pipe).
    pub fn from_stream(stream: Box<dyn Duplex>, io_timeout: Option<Duration>) -> Self {
        Self { stream, io_timeout }
    }

    /// Take the stream back out, e.g. to hand it to a TLS upgrader.
    pub fn into_stream(self) -> Box<dyn Duplex> {
        self.stream
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    /// Read at least one byte into `buf`, suspending until data arrives.
    ///
    /// Returns the number of bytes read; 0 means the peer closed the stream.
    pub async fn read_into(&mut self, buf: &mut BytesMut) -> PgResult<usize> {
        let read = self.stream.read_buf(buf);
        match self.io_timeout {
            Some(t) => tokio::time::timeout(t, read)
                .await
                .map_err(|_| PgError::TransportTimeout)?
                .map_err(PgError::Io),
            None => read.await.map_err(PgError::Io),
        }
    }

    /// Read exactly `n` bytes.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> PgResult<()> {
        let read = self.stream.read_exact(buf);
        let result = match self.io_timeout {
            Some(t) => tokio::time::timeout(t, read)
                .await
                .map_err(|_| PgError::TransportTimeout)?,
            None => read.await,
        };
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(PgError::TransportClosed)
            }
            Err(e) => Err(PgError::Io(e)),
        }
    }

    /// Write the whole buffer and flush; partial writes are retried
    /// internally by tokio's `write_all`.
    pub async fn write_full(&mut self, buf: &[u8]) -> PgResult<()> {
        let write = async {
            self.stream.write_all(buf).await?;
            self.stream.flush().await
        };
        match self.io_timeout {
            Some(t) => tokio::time::timeout(t, write)
                .await
                .map_err(|_| PgError::TransportTimeout)?
                .map_err(PgError::Io),
            None => write.await.map_err(PgError::Io),
        }
    }

    /// Shut down the write side; best effort.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_after_peer_close_reports_zero() {
        let (client, server) = tokio::io::duplex(64);
        let mut transport = Transport::from_stream(Box::new(client), None);
        drop(server);

        let mut buf = BytesMut::new();
        let n = transport.read_into(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = Transport::from_stream(Box::new(client), None);

        transport.write_full(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn read_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport =
            Transport::from_stream(Box::new(client), Some(Duration::from_millis(20)));

        let mut buf = BytesMut::new();
        let err = transport.read_into(&mut buf).await.unwrap_err();
        assert!(matches!(err, PgError::TransportTimeout));
    }
}
