//! `AsyncConnection` (§4.2): a non-blocking socket wrapper over a plain or TLS stream.
//! Modeled as a small enum over `tokio::net::TcpStream` and (optionally)
//! `tokio_rustls::client::TlsStream`, the way the teacher's `runtime::AsyncStream`
//! gives both transports one read/write surface.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

#[derive(Debug)]
enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// One TCP (or TLS) socket plus the bookkeeping the pool needs: an id for logging, the
/// address it's connected to, and the idle-horizon timestamp from §3.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub address: SocketAddr,
    stream: Stream,
    last_used: Instant,
    closed: bool,
}

impl Connection {
    pub async fn connect(id: u64, address: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| Error::network(address, e.to_string()))?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            id,
            address,
            stream: Stream::Plain(stream),
            last_used: Instant::now(),
            closed: false,
        })
    }

    #[cfg(feature = "rustls-tls")]
    pub async fn connect_tls(
        id: u64,
        address: SocketAddr,
        server_name: tokio_rustls::rustls::pki_types::ServerName<'static>,
        config: std::sync::Arc<tokio_rustls::rustls::ClientConfig>,
    ) -> Result<Self> {
        let tcp = TcpStream::connect(address)
            .await
            .map_err(|e| Error::network(address, e.to_string()))?;
        let connector = tokio_rustls::TlsConnector::from(config);
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::network(address, format!("tls handshake failed: {e}")))?;
        Ok(Self {
            id,
            address,
            stream: Stream::Tls(Box::new(tls)),
            last_used: Instant::now(),
            closed: false,
        })
    }

    /// Sends exactly `buf.len()` bytes. Per §4.2, a send that would exceed the
    /// message length is never issued by this layer — callers slice `buf` themselves.
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        let result = match &mut self.stream {
            Stream::Plain(s) => s.write_all(buf).await,
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(s) => s.write_all(buf).await,
        };
        match result {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(e) => {
                self.closed = true;
                Err(Error::network(self.address, e.to_string()))
            }
        }
    }

    /// Reads exactly `buf.len()` bytes. A read that observes EOF before filling `buf`
    /// is surfaced as a "closed" connection error (§4.2).
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = match &mut self.stream {
            Stream::Plain(s) => s.read_exact(buf).await,
            #[cfg(feature = "rustls-tls")]
            Stream::Tls(s) => s.read_exact(buf).await,
        };
        match result {
            Ok(_) => {
                self.touch();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.closed = true;
                Err(Error::connection_closed(self.address))
            }
            Err(e) => {
                self.closed = true;
                Err(Error::network(self.address, e.to_string()))
            }
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// `isValid()` = connected AND idle horizon not exceeded (§4.2's invariant).
    pub fn is_valid(&self, max_idle: Duration) -> bool {
        !self.closed && self.last_used.elapsed() <= max_idle
    }

    pub fn close(mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn send_then_recv_round_trips() {
        let addr = loopback_echo().await;
        let mut conn = Connection::connect(1, addr).await.unwrap();
        conn.send(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert!(conn.is_valid(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn idle_past_horizon_is_invalid() {
        let addr = loopback_echo().await;
        let conn = Connection::connect(1, addr).await.unwrap();
        assert!(!conn.is_valid(Duration::from_millis(0)));
    }

    #[tokio::test]
    async fn eof_mid_read_surfaces_as_closed_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        let mut conn = Connection::connect(1, addr).await.unwrap();
        let mut buf = [0u8; 8];
        let err = conn.recv(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("closed") || err.is_retryable());
    }
}
