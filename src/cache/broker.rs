//! The socket cache.
//!
//! [`SocketCache`] deduplicates requests per endpoint, enforces share
//! policy, counts grants, and closes a socket as soon as its last grant is
//! released, dropped with its application, or expires unpicked.
//!
//! # Locking
//!
//! All indices sit behind one mutex and every operation mutates them in a
//! single critical section. The lock is never held across an `.await`: while
//! the creator is working, the endpoint is marked in flight so concurrent
//! requests for it wait for the result instead of creating a second socket.
//!
//! Audit events are collected while the lock is held and written to the
//! audit logger after it is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::creator::{CreatorError, SocketCreator};
use super::error::{CacheError, CacheResult};
use super::socket::CachedSocket;
use super::state::{CacheState, Released};
use super::types::{ApplicationId, Endpoint, SocketGrant, SocketInfo, SocketRequest, Token};
use crate::config::CacheConfig;
use crate::telemetry::{AuditEvent, AuditLogger};

/// Cache of bound sockets handed out by token.
pub struct SocketCache<C> {
    creator: C,
    state: Mutex<CacheState>,
    pickup_timeout: Duration,
    audit: Option<Arc<AuditLogger>>,
}

/// What a `get_token` call does after inspecting the cache.
enum NextStep {
    /// The request was answered from the cache.
    Done(CacheResult<Token>),
    /// Another request is creating the socket; wait for it.
    Wait(tokio::sync::watch::Receiver<()>),
    /// This request owns the creation.
    Create,
}

impl<C: SocketCreator> SocketCache<C> {
    /// Create a cache using the pickup timeout from `config`.
    pub fn new(creator: C, config: &CacheConfig) -> CacheResult<Self> {
        Self::with_pickup_timeout(creator, config.pickup_timeout())
    }

    /// Create a cache whose issued tokens must be picked up within
    /// `pickup_timeout`.
    pub fn with_pickup_timeout(creator: C, pickup_timeout: Duration) -> CacheResult<Self> {
        if pickup_timeout.is_zero() {
            return Err(CacheError::InvalidArgument(
                "pickup timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            creator,
            state: Mutex::new(CacheState::default()),
            pickup_timeout,
            audit: None,
        })
    }

    /// Set the audit logger for socket lifecycle events.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Request a token for a socket.
    ///
    /// The socket is taken from the cache when one exists for the endpoint,
    /// otherwise the creator is asked for it. The token must be redeemed with
    /// [`get_socket`](Self::get_socket) within the pickup timeout.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Share`] if the cached socket cannot be shared with
    ///   the request. This considers the terms of every existing grant, so it
    ///   can happen even for `ANY` requests.
    /// - [`CacheError::Socket`] if the creator could not create the socket.
    /// - [`CacheError::CreatorFatal`] if the creator failed fatally. The
    ///   hosting process should shut down.
    ///
    /// On error the cache is unchanged.
    pub async fn get_token(&self, request: SocketRequest) -> CacheResult<Token> {
        let endpoint = request.endpoint;
        loop {
            let mut events = Vec::new();
            let next = {
                let mut state = self.lock();
                expire_locked(&mut state, Instant::now(), &mut events);

                match state.admit(
                    &endpoint,
                    &request.share,
                    request.requester.as_ref(),
                    Instant::now() + self.pickup_timeout,
                ) {
                    Some(result) => NextStep::Done(admission(&request, result, &mut events)),
                    None => match state.in_flight.get(&endpoint) {
                        Some(pending) => NextStep::Wait(pending.subscribe()),
                        None => {
                            let (pending, _) = tokio::sync::watch::channel(());
                            state.in_flight.insert(endpoint, pending);
                            NextStep::Create
                        }
                    },
                }
            };
            self.emit(events);

            match next {
                NextStep::Done(result) => return result,
                NextStep::Wait(mut done) => {
                    debug!("Waiting for in-flight creation of {}", endpoint);
                    // The sender is dropped when the creation ends, either way.
                    let _ = done.changed().await;
                }
                NextStep::Create => return self.create_and_admit(&request).await,
            }
        }
    }

    /// Ask the creator for the socket, then cache it and issue the token.
    async fn create_and_admit(&self, request: &SocketRequest) -> CacheResult<Token> {
        let endpoint = request.endpoint;
        let marker = InFlight {
            state: &self.state,
            endpoint,
            armed: true,
        };

        debug!("Requesting {} from socket creator", endpoint);
        let created = self.creator.create(&endpoint).await;

        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            marker.complete(&mut state);

            match created {
                Ok(fd) => {
                    let socket = CachedSocket::new(endpoint, fd);
                    let raw_fd = socket.raw_fd();
                    let result = state.insert_admitted(
                        socket,
                        &request.share,
                        request.requester.as_ref(),
                        Instant::now() + self.pickup_timeout,
                    );
                    if result.is_ok() {
                        info!("Cached new socket {} (fd {})", endpoint, raw_fd);
                        events.push(AuditEvent::SocketCreated {
                            endpoint: endpoint.to_string(),
                            fd: raw_fd,
                        });
                    }
                    admission(request, result, &mut events)
                }
                Err(err) => Err(creator_failed(endpoint, err, &mut events)),
            }
        };
        self.emit(events);
        result
    }

    /// Redeem a token for the socket behind it.
    ///
    /// A token can be redeemed once. The descriptor remains owned by the
    /// cache; the caller may use it until it drops the token.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidToken`] if the token is unknown, was already
    /// redeemed, was dropped, or expired.
    pub fn get_socket(
        &self,
        token: Token,
        application: &ApplicationId,
    ) -> CacheResult<SocketGrant> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            expire_locked(&mut state, Instant::now(), &mut events);
            state.pick_up(token, application)
        };

        if let Ok(grant) = &result {
            debug!(
                "Application {} picked up {} with token {}",
                application, grant.endpoint, token
            );
            events.push(AuditEvent::SocketPickedUp {
                token: token.to_string(),
                endpoint: grant.endpoint.to_string(),
                application: application.to_string(),
            });
        }
        self.emit(events);
        result
    }

    /// Release a token, picked up or not.
    ///
    /// Closes the socket when this was its last grant.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidToken`] if the token is not live. Dropping the
    /// same token twice fails the second time.
    pub fn drop_socket(&self, token: Token) -> CacheResult<()> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            expire_locked(&mut state, Instant::now(), &mut events);
            state.release(token)
        };

        let result = result.map(|released| release_events(&released, &mut events));
        self.emit(events);
        result
    }

    /// Release every token attributed to an application.
    ///
    /// Called when an application terminates, including abnormally, so that
    /// none of its sockets outlive it.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidToken`] if nothing is attributed to the
    /// application.
    pub fn drop_application(&self, application: &ApplicationId) -> CacheResult<()> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            expire_locked(&mut state, Instant::now(), &mut events);
            release_application(&mut state, application, &mut events)
        };
        self.emit(events);
        result
    }

    /// Retire every token whose pickup deadline has passed.
    ///
    /// Returns the retired tokens with their endpoints.
    pub fn sweep_expired(&self) -> Vec<(Token, Endpoint)> {
        let mut events = Vec::new();
        let expired = expire_locked(&mut self.lock(), Instant::now(), &mut events);
        self.emit(events);
        expired
    }

    /// Number of sockets currently cached.
    pub fn socket_count(&self) -> usize {
        self.lock().socket_count()
    }

    /// Number of tokens currently live, waiting or picked up.
    pub fn live_token_count(&self) -> usize {
        self.lock().live_token_count()
    }

    /// Whether a socket for `endpoint` is cached.
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.lock().find(endpoint).is_some()
    }

    /// Tokens attributed to `application`.
    pub fn application_tokens(&self, application: &ApplicationId) -> Vec<Token> {
        self.lock().tokens_of(application).unwrap_or_default()
    }

    /// View of every cached socket.
    pub fn snapshot(&self) -> Vec<SocketInfo> {
        self.lock().snapshot()
    }

    /// The configured pickup timeout.
    pub fn pickup_timeout(&self) -> Duration {
        self.pickup_timeout
    }

    /// Write collected events. Must not be called with the state locked.
    fn emit(&self, events: Vec<AuditEvent>) {
        if let Some(ref audit) = self.audit {
            for event in events {
                audit.log(event);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }
}

fn release_application(
    state: &mut CacheState,
    application: &ApplicationId,
    events: &mut Vec<AuditEvent>,
) -> CacheResult<()> {
    let tokens = state.tokens_of(application).ok_or_else(|| {
        CacheError::InvalidToken(format!("no sockets held by application {}", application))
    })?;

    for token in &tokens {
        let released = state.release(*token)?;
        release_events(&released, events);
    }

    info!(
        "Reclaimed {} token(s) of application {}",
        tokens.len(),
        application
    );
    events.push(AuditEvent::ApplicationDropped {
        application: application.to_string(),
        tokens: tokens.len(),
    });
    Ok(())
}

fn expire_locked(
    state: &mut CacheState,
    now: Instant,
    events: &mut Vec<AuditEvent>,
) -> Vec<(Token, Endpoint)> {
    state
        .expire(now)
        .into_iter()
        .map(|released| {
            info!(
                "Token {} for {} was not picked up in time",
                released.token, released.endpoint
            );
            events.push(AuditEvent::TokenExpired {
                token: released.token.to_string(),
                endpoint: released.endpoint.to_string(),
            });
            closed_events(&released, events);
            (released.token, released.endpoint)
        })
        .collect()
}

fn admission(
    request: &SocketRequest,
    result: CacheResult<Token>,
    events: &mut Vec<AuditEvent>,
) -> CacheResult<Token> {
    match &result {
        Ok(token) => {
            debug!(
                "Issued token {} for {} ({} '{}')",
                token, request.endpoint, request.share.mode, request.share.name
            );
            events.push(AuditEvent::TokenIssued {
                token: token.to_string(),
                endpoint: request.endpoint.to_string(),
                share_mode: request.share.mode,
                share_name: request.share.name.clone(),
                requester: request.requester.as_ref().map(ToString::to_string),
            });
        }
        Err(CacheError::Share { .. }) => {
            info!(
                "Refused to share {} under {} '{}'",
                request.endpoint, request.share.mode, request.share.name
            );
            events.push(AuditEvent::ShareDenied {
                endpoint: request.endpoint.to_string(),
                share_mode: request.share.mode,
                share_name: request.share.name.clone(),
            });
        }
        Err(_) => {}
    }
    result
}

fn creator_failed(
    endpoint: Endpoint,
    err: CreatorError,
    events: &mut Vec<AuditEvent>,
) -> CacheError {
    let err = CacheError::from_creator(endpoint, err);
    let reason = match &err {
        CacheError::Socket { reason, .. } => Some(*reason),
        _ => None,
    };
    if err.is_fatal() {
        error!("Socket creator failed fatally for {}: {}", endpoint, err);
    } else {
        warn!("{}", err);
    }
    events.push(AuditEvent::CreatorFailed {
        endpoint: endpoint.to_string(),
        reason,
        fatal: err.is_fatal(),
    });
    err
}

fn release_events(released: &Released, events: &mut Vec<AuditEvent>) {
    debug!(
        "Dropped {} token {} for {}",
        if released.was_active { "active" } else { "waiting" },
        released.token,
        released.endpoint
    );
    events.push(AuditEvent::TokenDropped {
        token: released.token.to_string(),
        endpoint: released.endpoint.to_string(),
        application: released.holder.as_ref().map(ToString::to_string),
    });
    closed_events(released, events);
}

fn closed_events(released: &Released, events: &mut Vec<AuditEvent>) {
    if released.closed {
        info!("Socket {} released by its last holder", released.endpoint);
        events.push(AuditEvent::SocketClosed {
            endpoint: released.endpoint.to_string(),
        });
    }
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    // State is only mutated by code that cannot panic halfway.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks an endpoint as being created and clears the mark on every exit,
/// including when the `get_token` future is dropped mid-creation.
struct InFlight<'a> {
    state: &'a Mutex<CacheState>,
    endpoint: Endpoint,
    armed: bool,
}

impl InFlight<'_> {
    fn complete(mut self, state: &mut CacheState) {
        state.in_flight.remove(&self.endpoint);
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Creation of {} abandoned", self.endpoint);
            lock_state(self.state).in_flight.remove(&self.endpoint);
        }
    }
}
