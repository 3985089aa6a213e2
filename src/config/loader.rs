//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/sockcache/config.toml`
//! 3. User config: `~/.config/sockcache/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{CacheConfig, Config};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/sockcache/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "sockcache";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system/user files are skipped. A missing `--config` file,
    /// invalid TOML, or an invalid value is an error.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        if cli.pickup_timeout_ms.is_some() {
            config.merge(Config {
                cache: CacheConfig {
                    pickup_timeout_ms: cli.pickup_timeout_ms,
                    ..Default::default()
                },
                ..Default::default()
            });
            debug!("Pickup timeout overridden from CLI");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;
    use tempfile::tempdir;

    fn create_test_cli() -> Cli {
        Cli::parse_from(["sockcache", "show-config"])
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_paths(
            dir.path().join("nonexistent_system.toml"),
            dir.path().join("nonexistent_user.toml"),
        );

        let config = loader.load(&create_test_cli()).unwrap();

        assert_eq!(config.cache.pickup_timeout(), Duration::from_secs(30));
        assert!(config.audit.syslog_enabled());
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();

        fs::write(
            dir.path().join("system.toml"),
            "[cache]\npickup_timeout_ms = 60000\nsweep_interval_ms = 500\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[cache]\npickup_timeout_ms = 90000\n",
        )
        .unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let config = loader.load(&create_test_cli()).unwrap();

        assert_eq!(config.cache.pickup_timeout(), Duration::from_secs(90));
        assert_eq!(config.cache.sweep_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_cli_config_file_and_flag() {
        let dir = tempdir().unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(&extra, "[cache]\npickup_timeout_ms = 1000\n[audit]\nsyslog = false\n").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));

        let cli = Cli::parse_from([
            "sockcache",
            "--config",
            extra.to_str().unwrap(),
            "show-config",
        ]);
        let config = loader.load(&cli).unwrap();
        assert_eq!(config.cache.pickup_timeout(), Duration::from_secs(1));
        assert!(!config.audit.syslog_enabled());

        let cli = Cli::parse_from([
            "sockcache",
            "--config",
            extra.to_str().unwrap(),
            "--pickup-timeout-ms",
            "250",
            "show-config",
        ]);
        let config = loader.load(&cli).unwrap();
        assert_eq!(config.cache.pickup_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));

        let missing = dir.path().join("missing.toml");
        let cli = Cli::parse_from(["sockcache", "-c", missing.to_str().unwrap(), "show-config"]);

        assert!(matches!(
            loader.load(&cli),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("invalid.toml"), "this is not valid TOML [[[").unwrap();

        let loader = ConfigLoader::with_paths(
            dir.path().join("invalid.toml"),
            dir.path().join("user.toml"),
        );
        let err = loader.load(&create_test_cli()).unwrap_err();

        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_zero_timeout_from_cli_rejected() {
        let dir = tempdir().unwrap();
        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let cli = Cli::parse_from(["sockcache", "--pickup-timeout-ms", "0", "show-config"]);

        assert!(matches!(
            loader.load(&cli),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
