//! Lazily opened query connections.

use crate::error::NetError;
use crate::stream::QueryStream;
use gameq_protocol::Transport;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};

/// Default connect timeout for TCP queries.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Transport to speak.
    pub transport: Transport,
    /// Server query address.
    pub addr: SocketAddr,
    /// Connection timeout (TCP only; UDP connect never waits).
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(transport: Transport, addr: SocketAddr) -> Self {
        Self {
            transport,
            addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A socket to one server that is opened on first write.
///
/// A connection owns at most one OS socket. It can be handed from the
/// challenge phase to the query phase by moving it, which keeps the local
/// port stable for servers that tie the challenge to it.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    stream: Option<QueryStream>,
}

impl Connection {
    /// Creates a new connection (not yet opened).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    pub fn transport(&self) -> Transport {
        self.config.transport
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Local endpoint of the open socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Opens the socket if needed.
    pub async fn open(&mut self) -> Result<(), NetError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.config.addr;
        let transport = self.config.transport;
        let connect_error = |source: io::Error| NetError::Connect {
            addr,
            transport,
            source,
        };

        tracing::debug!("Opening {} socket to {}", transport, addr);
        let stream = match transport {
            Transport::Udp => {
                let bind: SocketAddr = if addr.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = UdpSocket::bind(bind).await.map_err(connect_error)?;
                socket.connect(addr).await.map_err(connect_error)?;
                QueryStream::Udp(socket)
            }
            Transport::Tcp => {
                let stream = tokio::time::timeout(
                    self.config.connect_timeout,
                    TcpStream::connect(addr),
                )
                .await
                .map_err(|_| {
                    tracing::debug!("Connection to {} timed out", addr);
                    NetError::ConnectTimeout { addr }
                })?
                .map_err(connect_error)?;
                stream.set_nodelay(true).ok();
                QueryStream::Tcp(stream)
            }
        };

        self.stream = Some(stream);
        Ok(())
    }

    /// Writes `data`, opening the socket on first use. Returns the number of
    /// bytes written.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, NetError> {
        self.open().await?;
        let stream = self.stream.as_mut().ok_or(NetError::NotConnected)?;
        let written = stream.send(data).await?;
        tracing::debug!("Wrote {} bytes to {}", written, self.config.addr);
        Ok(written)
    }

    /// Drops the socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed connection to {}", self.config.addr);
        }
    }

    /// Polls the socket for readability. A closed connection reports
    /// `NotConnected`.
    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &self.stream {
            Some(stream) => stream.poll_read_ready(cx),
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    /// Non-blocking receive into `buf`.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.stream {
            Some(stream) => stream.try_read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}
