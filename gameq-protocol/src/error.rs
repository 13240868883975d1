//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding a server's response.
///
/// Every variant is scoped to one server: the engine either surfaces it
/// (debug mode) or turns it into an offline result for that server.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("buffer underrun: requested {requested} bytes, {remaining} remaining")]
    BufferUnderrun { requested: usize, remaining: usize },

    #[error("decompressed length mismatch: expected {expected} bytes, got {actual}")]
    Decompression { expected: usize, actual: usize },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("unexpected packet header: expected {expected:#x}, got {actual:#x}")]
    UnexpectedHeader { expected: i64, actual: i64 },

    #[error("unknown response type: {0:#04x}")]
    UnknownResponse(u8),

    #[error("split response has no fragments")]
    MissingFragment,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Returns whether the error means the response was cut short rather than
    /// structurally wrong.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ProtocolError::BufferUnderrun { .. })
    }
}
