//! Socket cache.
//!
//! Keeps bound sockets so that several applications can receive the same
//! descriptor, and closes each socket once nobody holds it.
//!
//! A consumer first asks for a [`Token`] with [`SocketCache::get_token`],
//! passes it to the application that will use the socket, and that
//! application redeems it with [`SocketCache::get_socket`]. Releasing goes
//! through [`SocketCache::drop_socket`], or [`SocketCache::drop_application`]
//! when the application terminates. Tokens not picked up within the pickup
//! timeout expire.
//!
//! # Sharing
//!
//! | held \ requested | `NO` | `SAMEAPP` | `ANY` |
//! |------------------|------|-----------|-------|
//! | `NO`             | no   | no        | no    |
//! | `SAMEAPP`        | no   | same name | same name |
//! | `ANY`            | no   | same name | yes   |
//!
//! A request is admitted only if it is compatible with every grant on the
//! socket, waiting or picked up.

mod broker;
mod creator;
mod error;
mod socket;
mod state;
mod sweeper;
mod types;

pub use broker::SocketCache;
pub use creator::{CreatorError, SocketCreator, SocketFailure};
pub use error::{CacheError, CacheResult};
pub use sweeper::run_expiry_sweeper;
pub use types::{
    ApplicationId, Endpoint, Protocol, Share, ShareMode, SocketGrant, SocketInfo, SocketRequest,
    Token,
};
