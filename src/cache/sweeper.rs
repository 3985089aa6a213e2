//! Background expiry of unpicked tokens.
//!
//! Every cache operation already retires overdue tokens before it runs, so
//! the sweeper only matters for a cache that sits idle: without it a
//! forgotten token would keep its socket open until the next request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::broker::SocketCache;
use super::creator::SocketCreator;

/// Sweep `cache` for expired tokens every `interval` until `shutdown_rx`
/// carries `true` or its sender goes away.
pub async fn run_expiry_sweeper<C: SocketCreator>(
    cache: Arc<SocketCache<C>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Expiry sweeper started (every {:?})", interval);
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = cache.sweep_expired();
                if !expired.is_empty() {
                    debug!("Sweeper retired {} token(s)", expired.len());
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Expiry sweeper stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::creator::CreatorError;
    use crate::cache::types::{Endpoint, Protocol, Share, SocketRequest};
    use std::net::{IpAddr, Ipv4Addr};
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    struct PairCreator;

    impl SocketCreator for PairCreator {
        async fn create(&self, _endpoint: &Endpoint) -> Result<OwnedFd, CreatorError> {
            let (ours, _theirs) = UnixStream::pair()?;
            Ok(OwnedFd::from(ours))
        }
    }

    fn request() -> SocketRequest {
        SocketRequest::new(
            Protocol::Tcp,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            8053,
            Share::any("x"),
        )
    }

    #[tokio::test]
    async fn test_sweeper_closes_idle_expired_sockets() {
        let cache = Arc::new(
            SocketCache::with_pickup_timeout(PairCreator, Duration::from_millis(30)).unwrap(),
        );
        cache.get_token(request()).await.unwrap();
        assert_eq!(cache.socket_count(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(run_expiry_sweeper(
            cache.clone(),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        // Read without going through an operation that would expire it.
        assert_eq!(cache.socket_count(), 0);
        assert_eq!(cache.live_token_count(), 0);

        shutdown_tx.send(true).unwrap();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_sender_dropped() {
        let cache = SocketCache::with_pickup_timeout(PairCreator, Duration::from_secs(5)).unwrap();
        let cache = Arc::new(cache);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(run_expiry_sweeper(
            cache,
            Duration::from_millis(10),
            shutdown_rx,
        ));

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
