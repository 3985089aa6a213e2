//! Command-line interface definitions for sockcache.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cache::{Protocol, ShareMode};

/// Bound-socket cache for a privileged boss process.
///
/// sockcache keeps sockets bound on behalf of applications, hands the same
/// descriptor to every application allowed to share it, and closes it when
/// the last one lets go. The command line exercises the cache in-process.
#[derive(Parser, Debug)]
#[command(name = "sockcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Override how long an issued token may wait for pickup.
    #[arg(long = "pickup-timeout-ms", value_name = "MS", global = true)]
    pub pickup_timeout_ms: Option<u64>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for sockcache.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bind a socket through the cache, share it, and release it again.
    ///
    /// Issues several tokens for one endpoint, picks each up as a separate
    /// application, checks they all received the same descriptor, then
    /// drops everything and confirms the socket was closed.
    Probe(ProbeArgs),

    /// Print the merged configuration as TOML.
    #[command(name = "show-config")]
    ShowConfig,
}

/// Arguments for the `probe` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Transport protocol (tcp or udp).
    #[arg(long, default_value = "tcp", value_parser = parse_protocol)]
    pub protocol: Protocol,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub address: IpAddr,

    /// Port to bind (0 picks a free port).
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Share mode requested for every token (no, sameapp or any).
    #[arg(long, default_value = "any", value_parser = parse_share_mode)]
    pub share: ShareMode,

    /// Share name declared with every request.
    #[arg(long, default_value = "probe")]
    pub name: String,

    /// Number of tokens to request.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub requests: u8,
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    s.parse().map_err(|e: crate::cache::CacheError| e.to_string())
}

fn parse_share_mode(s: &str) -> Result<ShareMode, String> {
    s.parse().map_err(|e: crate::cache::CacheError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_cli_parse_show_config() {
        let cli = Cli::parse_from(["sockcache", "show-config"]);
        assert!(matches!(cli.command, Commands::ShowConfig));
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
        assert!(cli.pickup_timeout_ms.is_none());
    }

    #[test]
    fn test_probe_defaults() {
        let cli = Cli::parse_from(["sockcache", "probe"]);
        match cli.command {
            Commands::Probe(args) => {
                assert_eq!(args.protocol, Protocol::Tcp);
                assert_eq!(args.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
                assert_eq!(args.port, 0);
                assert_eq!(args.share, ShareMode::Any);
                assert_eq!(args.name, "probe");
                assert_eq!(args.requests, 2);
            }
            _ => panic!("Expected Probe command"),
        }
    }

    #[test]
    fn test_probe_with_options() {
        let cli = Cli::parse_from([
            "sockcache",
            "-vv",
            "probe",
            "--protocol",
            "UDP",
            "--address",
            "::1",
            "--port",
            "5353",
            "--share",
            "sameapp",
            "--name",
            "resolver",
            "--requests",
            "3",
            "--pickup-timeout-ms",
            "500",
        ]);

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.pickup_timeout_ms, Some(500));
        match cli.command {
            Commands::Probe(args) => {
                assert_eq!(args.protocol, Protocol::Udp);
                assert_eq!(args.address, "::1".parse::<IpAddr>().unwrap());
                assert_eq!(args.port, 5353);
                assert_eq!(args.share, ShareMode::SameApp);
                assert_eq!(args.name, "resolver");
                assert_eq!(args.requests, 3);
            }
            _ => panic!("Expected Probe command"),
        }
    }

    #[test]
    fn test_probe_rejects_bad_values() {
        assert!(Cli::try_parse_from(["sockcache", "probe", "--protocol", "sctp"]).is_err());
        assert!(Cli::try_parse_from(["sockcache", "probe", "--share", "maybe"]).is_err());
        assert!(Cli::try_parse_from(["sockcache", "probe", "--requests", "0"]).is_err());
        assert!(Cli::try_parse_from(["sockcache", "probe", "--address", "localhost"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["sockcache"]).is_err());
    }
}
