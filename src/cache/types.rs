//! Value types shared by the cache: endpoints, tokens, application handles
//! and share policy.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::RawFd;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use super::error::CacheError;

/// Transport protocol of a cached socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Datagram socket.
    Udp,
    /// Stream socket (bound and listening).
    Tcp,
}

impl Protocol {
    /// Lowercase protocol name, as used in endpoint URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(Protocol::Udp),
            "TCP" => Ok(Protocol::Tcp),
            _ => Err(CacheError::InvalidArgument(format!(
                "protocol '{}' is not UDP or TCP",
                s
            ))),
        }
    }
}

/// Identity of a bound socket: two requests with the same endpoint may be
/// served by the same cached socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Local address to bind to.
    pub address: IpAddr,
    /// Local port to bind to.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint identity.
    pub fn new(protocol: Protocol, address: IpAddr, port: u16) -> Self {
        Self {
            protocol,
            address,
            port,
        }
    }

    /// The address/port pair as a socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.socket_addr())
    }
}

/// Opaque handle for one grant on a cached socket.
///
/// Tokens are unique among the tokens currently live in a cache. A retired
/// token value may in principle be minted again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(Uuid);

impl Token {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Token {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Token)
            .map_err(|_| CacheError::InvalidToken(s.to_string()))
    }
}

/// Opaque handle of an application holding sockets.
///
/// Usually the identity of the application's control channel or its pid.
/// The same value must be used for pickup and for crash cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationId(String);

impl ApplicationId {
    /// The handle as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApplicationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ApplicationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u32> for ApplicationId {
    fn from(pid: u32) -> Self {
        Self(pid.to_string())
    }
}

/// How a socket may be shared between requesters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShareMode {
    /// Exclusive: no other grant may exist on the socket.
    No,
    /// Shared only with requests carrying the same share name.
    SameApp,
    /// Shared with anyone who does not demand more.
    Any,
}

impl fmt::Display for ShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareMode::No => f.write_str("NO"),
            ShareMode::SameApp => f.write_str("SAMEAPP"),
            ShareMode::Any => f.write_str("ANY"),
        }
    }
}

impl FromStr for ShareMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NO" => Ok(ShareMode::No),
            "SAMEAPP" => Ok(ShareMode::SameApp),
            "ANY" => Ok(ShareMode::Any),
            _ => Err(CacheError::InvalidArgument(format!(
                "share mode '{}' is not one of NO, SAMEAPP, ANY",
                s
            ))),
        }
    }
}

/// Share terms declared with a request: the mode and the application name
/// used by [`ShareMode::SameApp`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Share {
    /// Share mode.
    pub mode: ShareMode,
    /// Share name. Only compared when one side uses `SameApp`.
    pub name: String,
}

impl Share {
    /// Create share terms.
    pub fn new(mode: ShareMode, name: impl Into<String>) -> Self {
        Self {
            mode,
            name: name.into(),
        }
    }

    /// Share with anyone.
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(ShareMode::Any, name)
    }

    /// Share only with requests declaring the same name.
    pub fn same_app(name: impl Into<String>) -> Self {
        Self::new(ShareMode::SameApp, name)
    }

    /// Do not share at all.
    pub fn exclusive(name: impl Into<String>) -> Self {
        Self::new(ShareMode::No, name)
    }

    /// Whether a grant with these terms can coexist with a grant under `other`.
    ///
    /// The relation is symmetric.
    pub fn compatible_with(&self, other: &Share) -> bool {
        if self.mode == ShareMode::No || other.mode == ShareMode::No {
            return false;
        }
        if (self.mode == ShareMode::SameApp || other.mode == ShareMode::SameApp)
            && self.name != other.name
        {
            return false;
        }
        true
    }
}

/// A request for a token on an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRequest {
    /// Socket identity being requested.
    pub endpoint: Endpoint,
    /// Share terms of the requester.
    pub share: Share,
    /// Application the token is requested for, if already known.
    ///
    /// When set, the still-waiting token is reclaimed together with the
    /// application's other tokens by `drop_application`.
    pub requester: Option<ApplicationId>,
}

impl SocketRequest {
    /// Request a socket for `protocol://address:port` under `share`.
    pub fn new(protocol: Protocol, address: IpAddr, port: u16, share: Share) -> Self {
        Self {
            endpoint: Endpoint::new(protocol, address, port),
            share,
            requester: None,
        }
    }

    /// Attribute the token to `application` from the moment it is issued.
    pub fn requested_by(mut self, application: impl Into<ApplicationId>) -> Self {
        self.requester = Some(application.into());
        self
    }
}

/// Result of a successful pickup.
///
/// The descriptor stays owned by the cache and remains valid until the token
/// is dropped. Callers must not close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketGrant {
    /// Raw descriptor of the cached socket.
    pub fd: RawFd,
    /// Identity of the socket.
    pub endpoint: Endpoint,
}

/// Read-only view of one cached socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketInfo {
    /// Identity of the socket.
    pub endpoint: Endpoint,
    /// Raw descriptor held by the cache.
    pub fd: RawFd,
    /// Tokens issued but not yet picked up.
    pub waiting: usize,
    /// Tokens picked up and still held.
    pub active: usize,
}
