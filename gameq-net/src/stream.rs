//! Socket abstraction over the two transports a query can use.

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

/// An open query socket, either a connected UDP socket or a TCP stream.
#[derive(Debug)]
pub enum QueryStream {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl QueryStream {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            QueryStream::Udp(socket) => socket.local_addr(),
            QueryStream::Tcp(stream) => stream.local_addr(),
        }
    }

    /// Sends `data` as one datagram, or writes all of it to the stream.
    pub async fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            QueryStream::Udp(socket) => socket.send(data).await,
            QueryStream::Tcp(stream) => {
                stream.write_all(data).await?;
                Ok(data.len())
            }
        }
    }

    /// Registers interest in readability with the current task.
    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self {
            QueryStream::Udp(socket) => socket.poll_recv_ready(cx),
            QueryStream::Tcp(stream) => stream.poll_read_ready(cx),
        }
    }

    /// Non-blocking receive. `Ok(0)` means the peer is done sending.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            QueryStream::Udp(socket) => socket.try_recv(buf),
            QueryStream::Tcp(stream) => stream.try_read(buf),
        }
    }
}
