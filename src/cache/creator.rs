//! Interface to the socket creator.
//!
//! The creator is the privileged collaborator that performs `socket()` and
//! `bind()` and hands back the descriptor. The cache only asks it for
//! endpoints it does not hold yet.

use std::fmt;
use std::future::Future;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use nix::errno::Errno;
use serde::Serialize;
use thiserror::Error;

use super::types::Endpoint;

/// Classified reason a socket could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketFailure {
    /// Another socket is bound to the address.
    AddressInUse,
    /// Insufficient privileges for the address or port.
    PermissionDenied,
    /// The address is not configured on this host.
    AddressUnavailable,
    /// The address family or protocol is not supported here.
    FamilyUnsupported,
    /// Anything else.
    Other,
}

impl SocketFailure {
    /// Classify an I/O error returned by socket creation.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => SocketFailure::AddressInUse,
            io::ErrorKind::PermissionDenied => SocketFailure::PermissionDenied,
            io::ErrorKind::AddrNotAvailable => SocketFailure::AddressUnavailable,
            io::ErrorKind::Unsupported => SocketFailure::FamilyUnsupported,
            _ => match err.raw_os_error() {
                Some(code)
                    if code == Errno::EAFNOSUPPORT as i32
                        || code == Errno::EPROTONOSUPPORT as i32 =>
                {
                    SocketFailure::FamilyUnsupported
                }
                Some(code) if code == Errno::EPERM as i32 => SocketFailure::PermissionDenied,
                _ => SocketFailure::Other,
            },
        }
    }
}

impl fmt::Display for SocketFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SocketFailure::AddressInUse => "address in use",
            SocketFailure::PermissionDenied => "permission denied",
            SocketFailure::AddressUnavailable => "address not available",
            SocketFailure::FamilyUnsupported => "address family not supported",
            SocketFailure::Other => "socket creation failed",
        };
        f.write_str(text)
    }
}

/// Errors reported by a [`SocketCreator`].
#[derive(Debug, Error)]
pub enum CreatorError {
    /// The socket could not be created. The caller may retry elsewhere.
    #[error("{reason}: {source}")]
    Socket {
        /// Classified cause.
        reason: SocketFailure,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The creator itself is broken (helper died, protocol violation).
    #[error("{0}")]
    Fatal(String),
}

impl From<io::Error> for CreatorError {
    fn from(source: io::Error) -> Self {
        CreatorError::Socket {
            reason: SocketFailure::from_io(&source),
            source,
        }
    }
}

impl From<Errno> for CreatorError {
    fn from(errno: Errno) -> Self {
        CreatorError::from(io::Error::from(errno))
    }
}

/// Produces bound sockets for endpoints.
pub trait SocketCreator: Send + Sync {
    /// Create a socket bound to `endpoint` (and listening, for TCP).
    fn create(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<OwnedFd, CreatorError>> + Send;
}

impl<T: SocketCreator> SocketCreator for Arc<T> {
    fn create(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<OwnedFd, CreatorError>> + Send {
        (**self).create(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_errors() {
        let in_use = io::Error::new(io::ErrorKind::AddrInUse, "busy");
        assert_eq!(SocketFailure::from_io(&in_use), SocketFailure::AddressInUse);

        let denied = io::Error::from(Errno::EACCES);
        assert_eq!(SocketFailure::from_io(&denied), SocketFailure::PermissionDenied);

        let family = io::Error::from(Errno::EAFNOSUPPORT);
        assert_eq!(SocketFailure::from_io(&family), SocketFailure::FamilyUnsupported);

        let other = io::Error::other("strange");
        assert_eq!(SocketFailure::from_io(&other), SocketFailure::Other);
    }

    #[test]
    fn test_errno_conversion() {
        let err = CreatorError::from(Errno::EADDRNOTAVAIL);
        assert!(matches!(
            err,
            CreatorError::Socket {
                reason: SocketFailure::AddressUnavailable,
                ..
            }
        ));
    }
}
