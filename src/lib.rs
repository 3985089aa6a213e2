//! sockcache: bound-socket cache for a privileged boss process
//!
//! A boss that binds sockets on behalf of unprivileged applications keeps
//! them in a [`cache::SocketCache`]. Several applications can receive the
//! same descriptor when their share terms allow it, and each socket is closed
//! as soon as its last holder releases it or terminates.
//!
//! # Architecture
//!
//! - **Cache**: tokens, share policy, grant counting and expiry
//! - **Creator**: in-process socket creation and binding via `nix`
//! - **Config**: Hierarchical TOML configuration
//! - **Telemetry**: Structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod creator;
pub mod telemetry;
