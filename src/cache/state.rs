//! Index state of the cache.
//!
//! All indices live in one struct so they are always updated together under
//! one lock. Sockets are kept in an arena keyed by [`SocketId`]; every other
//! index refers to a socket by id.
//!
//! # Invariants
//!
//! - `by_endpoint` and `sockets` describe the same set of sockets.
//! - `token_owner` holds exactly the live tokens, each pointing at the socket
//!   that carries its grant.
//! - `deadlines` holds exactly the waiting tokens.
//! - `app_tokens` never contains an empty set, and every token in it is live
//!   and attributed to that application.
//! - No socket in the arena is unused.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use tokio::sync::watch;
use tracing::warn;

use super::error::{CacheError, CacheResult};
use super::socket::{CachedSocket, RemovedGrant, WaitingGrant};
use super::types::{ApplicationId, Endpoint, Share, SocketGrant, SocketInfo, Token};

/// Stable arena key of a cached socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SocketId(u64);

/// Outcome of releasing one token.
#[derive(Debug)]
pub(crate) struct Released {
    pub(crate) token: Token,
    pub(crate) endpoint: Endpoint,
    pub(crate) holder: Option<ApplicationId>,
    pub(crate) was_active: bool,
    /// The socket lost its last grant and was closed.
    pub(crate) closed: bool,
}

#[derive(Default)]
pub(crate) struct CacheState {
    sockets: HashMap<SocketId, CachedSocket>,
    by_endpoint: HashMap<Endpoint, SocketId>,
    token_owner: HashMap<Token, SocketId>,
    app_tokens: HashMap<ApplicationId, HashSet<Token>>,
    deadlines: BTreeSet<(Instant, Token)>,
    /// Creator calls in progress. Dropping a sender wakes its waiters.
    pub(crate) in_flight: HashMap<Endpoint, watch::Sender<()>>,
    next_id: u64,
}

impl CacheState {
    pub(crate) fn find(&self, endpoint: &Endpoint) -> Option<SocketId> {
        self.by_endpoint.get(endpoint).copied()
    }

    /// Issue a token on the socket cached for `endpoint`.
    ///
    /// Returns `None` when no socket is cached for it.
    pub(crate) fn admit(
        &mut self,
        endpoint: &Endpoint,
        share: &Share,
        requester: Option<&ApplicationId>,
        deadline: Instant,
    ) -> Option<CacheResult<Token>> {
        let id = self.find(endpoint)?;
        let token = mint_token(&self.token_owner);
        let socket = self.sockets.get_mut(&id)?;
        if let Err(err) = socket.offer(token, waiting(share, requester, deadline)) {
            return Some(Err(err));
        }
        self.register(id, token, requester, deadline);
        Some(Ok(token))
    }

    /// Cache a freshly created socket together with its first token.
    pub(crate) fn insert_admitted(
        &mut self,
        mut socket: CachedSocket,
        share: &Share,
        requester: Option<&ApplicationId>,
        deadline: Instant,
    ) -> CacheResult<Token> {
        let token = mint_token(&self.token_owner);
        socket.offer(token, waiting(share, requester, deadline))?;
        let id = self.insert_socket(socket);
        self.register(id, token, requester, deadline);
        Ok(token)
    }

    fn insert_socket(&mut self, socket: CachedSocket) -> SocketId {
        let id = SocketId(self.next_id);
        self.next_id += 1;
        self.by_endpoint.insert(*socket.endpoint(), id);
        self.sockets.insert(id, socket);
        id
    }

    fn register(
        &mut self,
        id: SocketId,
        token: Token,
        requester: Option<&ApplicationId>,
        deadline: Instant,
    ) {
        self.token_owner.insert(token, id);
        self.deadlines.insert((deadline, token));
        if let Some(application) = requester {
            self.attribute(application, token);
        }
    }

    /// Redeem a waiting token for `application`.
    pub(crate) fn pick_up(
        &mut self,
        token: Token,
        application: &ApplicationId,
    ) -> CacheResult<SocketGrant> {
        let id = self.owner(&token)?;
        let socket = self
            .sockets
            .get_mut(&id)
            .ok_or_else(|| CacheError::InvalidToken(token.to_string()))?;

        let waiting = socket
            .activate(token, application.clone())
            .ok_or_else(|| CacheError::InvalidToken(format!("{} was already picked up", token)))?;
        let grant = SocketGrant {
            fd: socket.raw_fd(),
            endpoint: *socket.endpoint(),
        };

        self.deadlines.remove(&(waiting.deadline, token));
        if waiting.requester.as_ref() != Some(application) {
            if let Some(requester) = waiting.requester.as_ref() {
                self.unattribute(requester, &token);
            }
            self.attribute(application, token);
        }
        Ok(grant)
    }

    /// Remove a token's grant, closing its socket if it was the last one.
    pub(crate) fn release(&mut self, token: Token) -> CacheResult<Released> {
        let id = self.owner(&token)?;
        let socket = self
            .sockets
            .get_mut(&id)
            .ok_or_else(|| CacheError::InvalidToken(token.to_string()))?;
        let removed = socket
            .remove_grant(&token)
            .ok_or_else(|| CacheError::InvalidToken(token.to_string()))?;
        let endpoint = *socket.endpoint();
        let unused = socket.is_unused();

        self.token_owner.remove(&token);
        if let RemovedGrant::Waiting(grant) = &removed {
            self.deadlines.remove(&(grant.deadline, token));
        }
        let holder = removed.holder().cloned();
        if let Some(application) = holder.as_ref() {
            self.unattribute(application, &token);
        }

        if unused {
            self.by_endpoint.remove(&endpoint);
            if let Some(socket) = self.sockets.remove(&id) {
                socket.close();
            }
        }

        Ok(Released {
            token,
            endpoint,
            holder,
            was_active: matches!(removed, RemovedGrant::Active(_)),
            closed: unused,
        })
    }

    /// Retire every waiting grant whose deadline is at or before `now`.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Released> {
        let mut expired = Vec::new();
        while let Some(&(deadline, token)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            match self.release(token) {
                Ok(released) => expired.push(released),
                Err(e) => warn!("Deadline recorded for dead token {}: {}", token, e),
            }
        }
        expired
    }

    /// Snapshot of the tokens attributed to `application`.
    pub(crate) fn tokens_of(&self, application: &ApplicationId) -> Option<Vec<Token>> {
        self.app_tokens
            .get(application)
            .map(|tokens| tokens.iter().copied().collect())
    }

    pub(crate) fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub(crate) fn live_token_count(&self) -> usize {
        self.token_owner.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<SocketInfo> {
        self.sockets.values().map(CachedSocket::info).collect()
    }

    #[cfg(test)]
    pub(crate) fn is_waiting(&self, token: &Token) -> bool {
        self.token_owner
            .get(token)
            .and_then(|id| self.sockets.get(id))
            .is_some_and(|socket| socket.is_waiting(token))
    }

    fn owner(&self, token: &Token) -> CacheResult<SocketId> {
        self.token_owner
            .get(token)
            .copied()
            .ok_or_else(|| CacheError::InvalidToken(token.to_string()))
    }

    fn attribute(&mut self, application: &ApplicationId, token: Token) {
        self.app_tokens
            .entry(application.clone())
            .or_default()
            .insert(token);
    }

    fn unattribute(&mut self, application: &ApplicationId, token: &Token) {
        if let Some(tokens) = self.app_tokens.get_mut(application) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.app_tokens.remove(application);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert_eq!(self.sockets.len(), self.by_endpoint.len());
        for (endpoint, id) in &self.by_endpoint {
            let socket = &self.sockets[id];
            assert_eq!(socket.endpoint(), endpoint);
            assert!(!socket.is_unused());
        }
        let grants: usize = self.sockets.values().map(CachedSocket::grant_count).sum();
        assert_eq!(grants, self.token_owner.len());
        let waiting = self
            .token_owner
            .keys()
            .filter(|token| self.is_waiting(token))
            .count();
        assert_eq!(waiting, self.deadlines.len());
        for tokens in self.app_tokens.values() {
            assert!(!tokens.is_empty());
            assert!(tokens.iter().all(|token| self.token_owner.contains_key(token)));
        }
    }
}

/// Draw tokens until one is not live.
fn mint_token(live: &HashMap<Token, SocketId>) -> Token {
    loop {
        let token = Token::generate();
        if !live.contains_key(&token) {
            return token;
        }
    }
}

fn waiting(share: &Share, requester: Option<&ApplicationId>, deadline: Instant) -> WaitingGrant {
    WaitingGrant {
        share: share.clone(),
        requester: requester.cloned(),
        deadline,
    }
}
