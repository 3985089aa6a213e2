//! Configuration system for sockcache.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! 1. System config: `/etc/sockcache/config.toml`
//! 2. User config: `~/.config/sockcache/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Scalars set by a later source override earlier ones.
//!
//! ```toml
//! [cache]
//! pickup_timeout_ms = 30000
//! sweep_interval_ms = 1000
//!
//! [audit]
//! syslog = true
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    AuditConfig, CacheConfig, Config, DEFAULT_PICKUP_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_MS,
};
