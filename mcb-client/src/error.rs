//! Client error taxonomy.

use std::io;

use mcb_common::{ProtocolError, Status};
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dial, read, write or timeout failure.
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// Malformed frame; the byte stream is no longer trustworthy.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Request could not be encoded (key, extras or body too long).
    /// Raised before any byte is written, so the connection stays usable.
    #[error("invalid request: {0}")]
    InvalidRequest(ProtocolError),

    /// Server answered with a non-success status.
    #[error("server status: {0}")]
    Status(Status),

    /// SASL negotiation failed.
    #[error("authentication failed: {detail}")]
    Auth {
        status: Option<Status>,
        detail: String,
    },

    /// No live server is available to route the request.
    #[error("no servers available")]
    NoServers,

    /// Server address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// True when the connection must be torn down and the request may be
    /// failed over to another server.
    pub fn is_network(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Protocol(_))
    }

    /// Server status carried by the error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::Status(status) => Some(*status),
            ClientError::Auth { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_errors() {
        let io = ClientError::from(io::Error::new(io::ErrorKind::TimedOut, "deadline"));
        assert!(io.is_network());
        assert!(ClientError::from(ProtocolError::TruncatedHeader(3)).is_network());
        assert!(!ClientError::Status(Status::KeyNotFound).is_network());
        assert!(!ClientError::NoServers.is_network());
        assert!(!ClientError::InvalidRequest(ProtocolError::KeyTooLong(70_000)).is_network());
    }

    #[test]
    fn exposes_status() {
        assert_eq!(
            ClientError::Status(Status::KeyExists).status(),
            Some(Status::KeyExists)
        );
        let auth = ClientError::Auth {
            status: Some(Status::AuthError),
            detail: "rejected".into(),
        };
        assert_eq!(auth.status(), Some(Status::AuthError));
        assert_eq!(ClientError::NoServers.status(), None);
    }
}
