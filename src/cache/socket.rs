//! One cached socket and the grants outstanding against it.
//!
//! A `CachedSocket` owns its descriptor. It is only ever closed by the cache
//! through [`CachedSocket::close`], once no waiting or active grant remains.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Instant;

use tracing::debug;

use super::error::{CacheError, CacheResult};
use super::types::{ApplicationId, Endpoint, Share, SocketInfo, Token};

/// A token issued but not yet picked up.
#[derive(Debug, Clone)]
pub(crate) struct WaitingGrant {
    pub(crate) share: Share,
    pub(crate) requester: Option<ApplicationId>,
    pub(crate) deadline: Instant,
}

/// A token picked up by an application.
#[derive(Debug, Clone)]
pub(crate) struct ActiveGrant {
    pub(crate) application: ApplicationId,
    pub(crate) share: Share,
}

/// A grant removed from a socket.
#[derive(Debug)]
pub(crate) enum RemovedGrant {
    Waiting(WaitingGrant),
    Active(ActiveGrant),
}

impl RemovedGrant {
    /// The application the token was attributed to, if any.
    pub(crate) fn holder(&self) -> Option<&ApplicationId> {
        match self {
            RemovedGrant::Waiting(grant) => grant.requester.as_ref(),
            RemovedGrant::Active(grant) => Some(&grant.application),
        }
    }
}

pub(crate) struct CachedSocket {
    endpoint: Endpoint,
    fd: OwnedFd,
    waiting: HashMap<Token, WaitingGrant>,
    active: HashMap<Token, ActiveGrant>,
}

impl CachedSocket {
    pub(crate) fn new(endpoint: Endpoint, fd: OwnedFd) -> Self {
        Self {
            endpoint,
            fd,
            waiting: HashMap::new(),
            active: HashMap::new(),
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Check whether a new grant under `share` may join the existing ones.
    ///
    /// Evaluated against every waiting and active grant; a socket without
    /// grants accepts anything.
    pub(crate) fn share_compatible(&self, share: &Share) -> bool {
        self.waiting
            .values()
            .map(|grant| &grant.share)
            .chain(self.active.values().map(|grant| &grant.share))
            .all(|existing| existing.compatible_with(share))
    }

    pub(crate) fn add_waiting(&mut self, token: Token, grant: WaitingGrant) {
        debug_assert!(!self.active.contains_key(&token));
        self.waiting.insert(token, grant);
    }

    /// Add a waiting grant if its share terms fit the existing grants.
    pub(crate) fn offer(&mut self, token: Token, grant: WaitingGrant) -> CacheResult<()> {
        if !self.share_compatible(&grant.share) {
            return Err(CacheError::Share {
                endpoint: self.endpoint,
                mode: grant.share.mode,
                name: grant.share.name,
            });
        }
        self.add_waiting(token, grant);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_waiting(&self, token: &Token) -> bool {
        self.waiting.contains_key(token)
    }

    /// Move a waiting grant to the active set under `application`.
    ///
    /// Returns the waiting record that was replaced, or `None` if the token
    /// is not waiting on this socket.
    pub(crate) fn activate(
        &mut self,
        token: Token,
        application: ApplicationId,
    ) -> Option<WaitingGrant> {
        let waiting = self.waiting.remove(&token)?;
        self.active.insert(
            token,
            ActiveGrant {
                application,
                share: waiting.share.clone(),
            },
        );
        Some(waiting)
    }

    pub(crate) fn remove_grant(&mut self, token: &Token) -> Option<RemovedGrant> {
        if let Some(grant) = self.waiting.remove(token) {
            return Some(RemovedGrant::Waiting(grant));
        }
        self.active.remove(token).map(RemovedGrant::Active)
    }

    pub(crate) fn grant_count(&self) -> usize {
        self.waiting.len() + self.active.len()
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.grant_count() == 0
    }

    pub(crate) fn info(&self) -> SocketInfo {
        SocketInfo {
            endpoint: self.endpoint,
            fd: self.raw_fd(),
            waiting: self.waiting.len(),
            active: self.active.len(),
        }
    }

    /// Close the descriptor. Only valid once every grant is gone.
    pub(crate) fn close(self) {
        debug_assert!(self.is_unused(), "closing {} with live grants", self.endpoint);
        debug!("Closing socket {} (fd {})", self.endpoint, self.raw_fd());
        drop(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::{Protocol, ShareMode};
    use std::io::Read;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    fn socket_with_peer() -> (CachedSocket, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let endpoint = Endpoint::new(Protocol::Udp, "127.0.0.1".parse().unwrap(), 53);
        (CachedSocket::new(endpoint, OwnedFd::from(ours)), theirs)
    }

    fn waiting(share: Share) -> WaitingGrant {
        WaitingGrant {
            share,
            requester: None,
            deadline: Instant::now() + Duration::from_secs(30),
        }
    }

    #[test]
    fn test_empty_socket_accepts_anything() {
        let (socket, _peer) = socket_with_peer();
        assert!(socket.share_compatible(&Share::exclusive("x")));
        assert!(socket.share_compatible(&Share::same_app("x")));
        assert!(socket.share_compatible(&Share::any("x")));
    }

    #[test]
    fn test_exclusive_grant_blocks_sharing() {
        let (mut socket, _peer) = socket_with_peer();
        socket.add_waiting(Token::generate(), waiting(Share::exclusive("app1")));

        assert!(!socket.share_compatible(&Share::any("app1")));
        assert!(!socket.share_compatible(&Share::same_app("app1")));
    }

    #[test]
    fn test_exclusive_request_blocked_by_any_grant() {
        let (mut socket, _peer) = socket_with_peer();
        socket.add_waiting(Token::generate(), waiting(Share::any("app1")));

        assert!(!socket.share_compatible(&Share::exclusive("app1")));
        assert!(socket.share_compatible(&Share::any("app2")));
    }

    #[test]
    fn test_active_grants_count_for_compatibility() {
        let (mut socket, _peer) = socket_with_peer();
        let token = Token::generate();
        socket.add_waiting(token, waiting(Share::same_app("app1")));
        socket.activate(token, ApplicationId::from("a")).unwrap();

        assert!(socket.share_compatible(&Share::same_app("app1")));
        assert!(!socket.share_compatible(&Share::same_app("app2")));
        assert!(!socket.share_compatible(&Share::any("app2")));
    }

    #[test]
    fn test_offer_rejects_without_adding() {
        let (mut socket, _peer) = socket_with_peer();
        socket
            .offer(Token::generate(), waiting(Share::same_app("app1")))
            .unwrap();

        let refused = Token::generate();
        let err = socket
            .offer(refused, waiting(Share::same_app("app2")))
            .unwrap_err();
        match err {
            CacheError::Share { mode, name, .. } => {
                assert_eq!(mode, ShareMode::SameApp);
                assert_eq!(name, "app2");
            }
            other => panic!("expected share error, got {:?}", other),
        }
        assert!(!socket.is_waiting(&refused));
        assert_eq!(socket.grant_count(), 1);
    }

    #[test]
    fn test_mixed_grants_check_every_holder() {
        let (mut socket, _peer) = socket_with_peer();
        socket.add_waiting(Token::generate(), waiting(Share::any("app1")));
        socket.add_waiting(Token::generate(), waiting(Share::same_app("app1")));

        assert!(socket.share_compatible(&Share::any("app1")));
        assert!(!socket.share_compatible(&Share::any("app2")));
    }

    #[test]
    fn test_activate_only_once() {
        let (mut socket, _peer) = socket_with_peer();
        let token = Token::generate();
        socket.add_waiting(token, waiting(Share::any("x")));

        assert!(socket.is_waiting(&token));
        assert!(socket.activate(token, ApplicationId::from("a")).is_some());
        assert!(!socket.is_waiting(&token));
        assert!(socket.activate(token, ApplicationId::from("a")).is_none());
        assert_eq!(socket.grant_count(), 1);
    }

    #[test]
    fn test_remove_grant_reports_holder() {
        let (mut socket, _peer) = socket_with_peer();
        let waiting_token = Token::generate();
        let active_token = Token::generate();
        socket.add_waiting(waiting_token, waiting(Share::any("x")));
        socket.add_waiting(active_token, waiting(Share::any("x")));
        socket.activate(active_token, ApplicationId::from("app")).unwrap();

        let removed = socket.remove_grant(&active_token).unwrap();
        assert!(matches!(removed, RemovedGrant::Active(_)));
        assert_eq!(removed.holder(), Some(&ApplicationId::from("app")));

        let removed = socket.remove_grant(&waiting_token).unwrap();
        assert!(matches!(removed, RemovedGrant::Waiting(_)));
        assert_eq!(removed.holder(), None);

        assert!(socket.remove_grant(&waiting_token).is_none());
        assert!(socket.is_unused());
    }

    #[test]
    fn test_close_releases_descriptor() {
        let (socket, mut peer) = socket_with_peer();
        let info = socket.info();
        assert_eq!(info.waiting, 0);
        assert_eq!(info.active, 0);

        socket.close();

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }
}
