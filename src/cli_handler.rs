//! Command handling for sockcache.
//!
//! Runs the `probe` and `show-config` subcommands.

use anyhow::{Context, Result, bail};
use nix::sys::socket::{SockaddrStorage, getsockname};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::{ApplicationId, Share, SocketCache, SocketRequest, Token, run_expiry_sweeper};
use crate::cli::{Cli, Commands, ProbeArgs};
use crate::config::Config;
use crate::creator::LocalCreator;
use crate::telemetry::AuditLogger;

/// Handle the parsed command line with the merged configuration.
pub fn handle_command(cli: &Cli, config: Config, audit: Arc<AuditLogger>) -> Result<()> {
    match &cli.command {
        Commands::Probe(args) => run_probe(args, &config, audit),
        Commands::ShowConfig => {
            let rendered = config
                .to_toml()
                .context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(())
        }
    }
}

/// Run the probe on a fresh runtime with the expiry sweeper alongside.
fn run_probe(args: &ProbeArgs, config: &Config, audit: Arc<AuditLogger>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        let cache = Arc::new(
            SocketCache::new(LocalCreator::new(), &config.cache)
                .context("Failed to create socket cache")?
                .with_audit(audit),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(run_expiry_sweeper(
            cache.clone(),
            config.cache.sweep_interval(),
            shutdown_rx,
        ));

        let mut tokens = Vec::new();
        let result = probe(&cache, args, &mut tokens).await;

        // Release whatever the probe left behind, even on failure.
        for token in tokens {
            if let Err(e) = cache.drop_socket(token) {
                warn!("Failed to release token {}: {}", token, e);
            }
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = sweeper.await {
            warn!("Expiry sweeper task failed: {}", e);
        }
        result
    })
}

async fn probe(
    cache: &SocketCache<LocalCreator>,
    args: &ProbeArgs,
    tokens: &mut Vec<Token>,
) -> Result<()> {
    let request = SocketRequest::new(
        args.protocol,
        args.address,
        args.port,
        Share::new(args.share, args.name.clone()),
    );
    let endpoint = request.endpoint;

    for _ in 0..args.requests {
        let token = cache
            .get_token(request.clone())
            .await
            .with_context(|| format!("Failed to get a token for {}", endpoint))?;
        info!("Issued token {}", token);
        tokens.push(token);
    }

    let mut fds = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let application = ApplicationId::from(format!("probe-{}", index + 1));
        let grant = cache
            .get_socket(*token, &application)
            .with_context(|| format!("Failed to pick up token {}", token))?;
        println!("{} picked up fd {} with token {}", application, grant.fd, token);
        fds.push(grant.fd);
    }

    let Some(&fd) = fds.first() else {
        bail!("Probe needs at least one request");
    };
    if fds.iter().any(|other| *other != fd) {
        bail!("Applications received different descriptors for {}", endpoint);
    }

    match getsockname::<SockaddrStorage>(fd) {
        Ok(bound) => println!(
            "{} is bound to {} and shared by {} holder(s)",
            endpoint,
            bound,
            fds.len()
        ),
        Err(e) => warn!("Could not read bound address of fd {}: {}", fd, e),
    }

    while let Some(token) = tokens.pop() {
        cache
            .drop_socket(token)
            .with_context(|| format!("Failed to drop token {}", token))?;
    }

    if cache.contains(&endpoint) {
        bail!("Socket {} is still cached after its last holder dropped it", endpoint);
    }
    println!("{} closed after the last holder dropped it", endpoint);
    Ok(())
}
