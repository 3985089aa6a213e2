//! Error types for cache operations.

use std::io;

use thiserror::Error;

use super::creator::{CreatorError, SocketFailure};
use super::types::{Endpoint, ShareMode};

/// Errors returned by [`SocketCache`](super::SocketCache) operations.
///
/// Every operation that fails leaves the cache unchanged.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The creator could not produce a socket for an endpoint not yet cached.
    #[error("Failed to create socket {endpoint}: {reason}: {source}")]
    Socket {
        /// The endpoint that was requested.
        endpoint: Endpoint,
        /// Classified cause.
        reason: SocketFailure,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The socket is cached but its grants forbid sharing with this request.
    #[error("Socket {endpoint} cannot be shared under mode {mode} with name '{name}'")]
    Share {
        /// The endpoint that was requested.
        endpoint: Endpoint,
        /// Requested share mode.
        mode: ShareMode,
        /// Requested share name.
        name: String,
    },

    /// Unknown, already used, already dropped or expired token, or an
    /// application handle with nothing attributed to it.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Malformed argument (share mode, protocol, timeout).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The creator failed in a way the hosting process cannot recover from.
    #[error("Fatal socket creator error: {0}")]
    CreatorFatal(String),
}

impl CacheError {
    /// Whether the error is a fatal creator failure. Callers are expected to
    /// shut the hosting process down instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::CreatorFatal(_))
    }

    pub(crate) fn from_creator(endpoint: Endpoint, err: CreatorError) -> Self {
        match err {
            CreatorError::Socket { reason, source } => CacheError::Socket {
                endpoint,
                reason,
                source,
            },
            CreatorError::Fatal(message) => CacheError::CreatorFatal(message),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::Protocol;

    fn endpoint() -> Endpoint {
        Endpoint::new(Protocol::Tcp, "0.0.0.0".parse().unwrap(), 53)
    }

    #[test]
    fn test_socket_error_from_creator() {
        let err = CacheError::from_creator(
            endpoint(),
            CreatorError::from(io::Error::new(io::ErrorKind::AddrInUse, "in use")),
        );
        assert!(matches!(
            err,
            CacheError::Socket {
                reason: SocketFailure::AddressInUse,
                ..
            }
        ));
        assert!(err.to_string().contains("tcp://0.0.0.0:53"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_from_creator() {
        let err = CacheError::from_creator(endpoint(), CreatorError::Fatal("gone".into()));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_share_error_message() {
        let err = CacheError::Share {
            endpoint: endpoint(),
            mode: ShareMode::SameApp,
            name: "app2".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("SAMEAPP"));
        assert!(message.contains("app2"));
    }
}
