//! Network error types.

use gameq_protocol::Transport;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Network errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("unable to connect to {transport}://{addr}: {source}")]
    Connect {
        addr: SocketAddr,
        transport: Transport,
        #[source]
        source: io::Error,
    },

    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: SocketAddr },

    #[error("not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// OS error number behind this failure, if there is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            NetError::Connect { source, .. } => source.raw_os_error(),
            NetError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
