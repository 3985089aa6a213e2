//! Configuration schema definitions.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/sockcache/config.toml`
//! 2. User config: `~/.config/sockcache/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Every source is optional except an explicit `--config` file. Values left
//! unset everywhere fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Default time a token may wait for pickup before it is retired.
pub const DEFAULT_PICKUP_TIMEOUT_MS: u64 = 30_000;

/// Default period of the background expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Socket cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Audit logging settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars set in `other` override the ones set here.
    pub fn merge(&mut self, other: Config) {
        self.cache.merge(other.cache);
        self.audit.merge(other.audit);
    }

    /// Render the configuration as TOML with every default filled in.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let effective = Config {
            cache: CacheConfig {
                pickup_timeout_ms: Some(
                    self.cache
                        .pickup_timeout_ms
                        .unwrap_or(DEFAULT_PICKUP_TIMEOUT_MS),
                ),
                sweep_interval_ms: Some(
                    self.cache
                        .sweep_interval_ms
                        .unwrap_or(DEFAULT_SWEEP_INTERVAL_MS),
                ),
            },
            audit: AuditConfig {
                syslog: Some(self.audit.syslog_enabled()),
            },
        };
        Ok(toml::to_string_pretty(&effective)?)
    }

    /// Reject values the cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.pickup_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "cache.pickup_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.cache.sweep_interval_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "cache.sweep_interval_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Socket cache settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Milliseconds an issued token may wait for pickup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_timeout_ms: Option<u64>,

    /// Milliseconds between background sweeps for expired tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_ms: Option<u64>,
}

impl CacheConfig {
    fn merge(&mut self, other: CacheConfig) {
        if other.pickup_timeout_ms.is_some() {
            self.pickup_timeout_ms = other.pickup_timeout_ms;
        }
        if other.sweep_interval_ms.is_some() {
            self.sweep_interval_ms = other.sweep_interval_ms;
        }
    }

    /// Effective pickup timeout.
    pub fn pickup_timeout(&self) -> Duration {
        Duration::from_millis(self.pickup_timeout_ms.unwrap_or(DEFAULT_PICKUP_TIMEOUT_MS))
    }

    /// Effective sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS))
    }
}

/// Audit logging settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    /// Send audit events to syslog. Defaults to on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog: Option<bool>,
}

impl AuditConfig {
    fn merge(&mut self, other: AuditConfig) {
        if other.syslog.is_some() {
            self.syslog = other.syslog;
        }
    }

    /// Whether syslog auditing is enabled.
    pub fn syslog_enabled(&self) -> bool {
        self.syslog.unwrap_or(true)
    }
}
