//! Non-blocking TCP transport: connect/bind/accept and chunked, timeout-bounded
//! recv/send.
//!
//! Grounded on `original_source/hyphen0/hyphen0/socket/basicsocket.py`: the same
//! connected-vs-bound distinction, the same "zero bytes read/written means the peer hung
//! up" rule, and `getnicename()` as [`BasicSocket::peer_name`]. The retry-on-WouldBlock
//! shape is carried over from `stsync-proxy/src/srt/socket.rs`'s `send_to_vectored`,
//! swapping UDP's `writable()` spin for the readable/writable pair TCP needs.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected, non-blocking TCP endpoint.
#[derive(Debug)]
pub struct BasicSocket {
    stream: TcpStream,
    peer_name: Option<String>,
    closed: bool,
}

impl BasicSocket {
    fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer_name: None,
            closed: false,
        })
    }

    /// Connects to `addr`, failing if nothing answers within `timeout`.
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::TimeoutError("connect"))??;
        Self::from_stream(stream)
    }

    /// Binds a listening socket. The OS's default backlog is used; Hyphen0 connections
    /// are accepted and handed off fast enough that tuning it has never mattered.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Acceptor> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Acceptor { listener })
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// A peer display string, cached after the first call.
    pub fn peer_name(&mut self) -> Result<&str> {
        if self.peer_name.is_none() {
            let addr = self.stream.peer_addr()?;
            self.peer_name = Some(addr.to_string());
        }
        Ok(self.peer_name.as_deref().unwrap())
    }

    /// Grabs whatever is immediately available, up to `max` bytes, without waiting.
    /// Returns an empty vec if nothing is ready yet. Used by the framing layer's tick,
    /// which must never block a connection's whole event loop on one peer.
    pub fn try_recv(&mut self, max: usize) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(Error::SocketClosed);
        }
        let mut buf = vec![0u8; max];
        match self.stream.try_read(&mut buf) {
            Ok(0) => {
                self.closed = true;
                Err(Error::SocketClosed)
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => {
                self.closed = true;
                Err(Error::Io(e))
            }
        }
    }

    /// Reads from the socket. If `strict`, blocks (cooperatively) until exactly `n`
    /// bytes have arrived or `timeout` elapses; otherwise returns as soon as any bytes
    /// are available. A zero-byte read is treated as the peer closing the connection.
    pub async fn recv(&mut self, n: usize, timeout: Duration, strict: bool) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(Error::SocketClosed);
        }

        let fut = async {
            let mut data = Vec::with_capacity(n);
            loop {
                if !strict && !data.is_empty() {
                    return Ok(data);
                }
                if data.len() >= n {
                    return Ok(data);
                }

                self.stream.readable().await?;
                let mut chunk = vec![0u8; n - data.len()];
                match self.stream.try_read(&mut chunk) {
                    Ok(0) => {
                        self.closed = true;
                        return Err(Error::SocketClosed);
                    }
                    Ok(read) => data.extend_from_slice(&chunk[..read]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        self.closed = true;
                        return Err(Error::Io(e));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::TimeoutError("recv"))?
    }

    /// Writes all of `data`, retrying through transient backpressure until `timeout`.
    pub async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(Error::SocketClosed);
        }

        let fut = async {
            let mut sent = 0;
            while sent < data.len() {
                self.stream.writable().await?;
                match self.stream.try_write(&data[sent..]) {
                    Ok(0) => {
                        self.closed = true;
                        return Err(Error::SocketClosed);
                    }
                    Ok(n) => sent += n,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        self.closed = true;
                        return Err(Error::Io(e));
                    }
                }
            }
            Ok(())
        };

        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::TimeoutError("send"))?
    }
}

/// Default recv/send timeout, matching the reference implementation's `timeout: float = 10`.
pub fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// A bound, listening socket.
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    pub async fn accept(&self) -> Result<(BasicSocket, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((BasicSocket::from_stream(stream)?, addr))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
