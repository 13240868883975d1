//! Core error types.

use crate::config::ConfigError;
use gameq_net::NetError;
use gameq_protocol::{Fields, ProtocolError};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from the query engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("missing port in server address: {0}")]
    MissingPort(String),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("unable to resolve host '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("query port out of range for {server_id}")]
    InvalidQueryPort { server_id: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error for {server_id}: {source}")]
    Net {
        server_id: String,
        #[source]
        source: NetError,
    },

    #[error("decoding response from {server_id} failed: {source}")]
    Decode {
        server_id: String,
        #[source]
        source: ProtocolError,
        /// Results of servers that were parsed before the failure.
        completed: HashMap<String, Fields>,
    },
}

impl EngineError {
    /// Returns whether the error concerns a single server rather than the
    /// whole batch.
    pub fn is_server_scoped(&self) -> bool {
        matches!(self, EngineError::Net { .. } | EngineError::Decode { .. })
    }

    /// Id of the server the error is about, if any.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            EngineError::Net { server_id, .. }
            | EngineError::Decode { server_id, .. }
            | EngineError::InvalidQueryPort { server_id } => Some(server_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::UnknownProtocol("quake9".to_string());
        assert_eq!(err.to_string(), "unknown protocol: quake9");

        let err = EngineError::Net {
            server_id: "srv".to_string(),
            source: NetError::NotConnected,
        };
        assert!(err.to_string().contains("srv"));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_server_scope() {
        let err = EngineError::Decode {
            server_id: "a".to_string(),
            source: ProtocolError::MissingFragment,
            completed: HashMap::new(),
        };
        assert!(err.is_server_scoped());
        assert_eq!(err.server_id(), Some("a"));

        let err = EngineError::MissingPort("localhost".to_string());
        assert!(!err.is_server_scoped());
        assert_eq!(err.server_id(), None);
    }
}
