//! In-process socket creator.
//!
//! [`LocalCreator`] does what a privileged socket creator does, in the
//! calling process: create the socket, set the usual options, bind it, and
//! start listening for TCP. It is what the `probe` command uses, and what a
//! boss that already runs with the needed privileges can hand to the cache.

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{
    self, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrIn6, sockopt,
};
use tracing::debug;

use crate::cache::{CreatorError, Endpoint, Protocol, SocketCreator};

/// Listen backlog used for TCP sockets unless configured otherwise.
pub const DEFAULT_BACKLOG: i32 = 128;

/// Creates and binds sockets in the current process.
#[derive(Debug, Clone)]
pub struct LocalCreator {
    backlog: i32,
}

impl LocalCreator {
    /// Create a creator with the default listen backlog.
    pub fn new() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// Set the listen backlog for TCP sockets.
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    fn open(&self, endpoint: &Endpoint) -> Result<OwnedFd, CreatorError> {
        let addr = endpoint.socket_addr();
        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        };
        let sock_type = match endpoint.protocol {
            Protocol::Udp => SockType::Datagram,
            Protocol::Tcp => SockType::Stream,
        };

        let fd = socket::socket(family, sock_type, SockFlag::SOCK_CLOEXEC, None)?;
        socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;

        match addr {
            SocketAddr::V4(v4) => {
                socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4))?;
            }
            SocketAddr::V6(v6) => {
                // Keep v4 and v6 endpoints independent of each other.
                socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true)?;
                socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6))?;
            }
        }

        if endpoint.protocol == Protocol::Tcp {
            socket::listen(&fd, Backlog::new(self.backlog)?)?;
        }

        debug!("Bound {} on fd {}", endpoint, fd.as_raw_fd());
        Ok(fd)
    }
}

impl Default for LocalCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketCreator for LocalCreator {
    async fn create(&self, endpoint: &Endpoint) -> Result<OwnedFd, CreatorError> {
        self.open(endpoint)
    }
}
