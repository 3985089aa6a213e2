//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `SOCKCACHE` tag so that every
//! socket handed out by the boss can be traced back to its holder.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{ShareMode, SocketFailure};

/// Audit events for the socket cache.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The creator produced a new socket and it entered the cache.
    SocketCreated {
        /// Endpoint of the socket (`tcp://addr:port`).
        endpoint: String,
        /// Descriptor held by the cache.
        fd: i32,
    },

    /// The creator refused or failed to produce a socket.
    CreatorFailed {
        /// Endpoint that was requested.
        endpoint: String,
        /// Classified reason, for recoverable failures.
        reason: Option<SocketFailure>,
        /// Whether the failure was fatal.
        fatal: bool,
    },

    /// The last grant went away and the socket was closed.
    SocketClosed {
        /// Endpoint of the socket.
        endpoint: String,
    },

    /// A token was issued for a socket.
    TokenIssued {
        /// The token.
        token: String,
        /// Endpoint of the socket.
        endpoint: String,
        /// Requested share mode.
        share_mode: ShareMode,
        /// Requested share name.
        share_name: String,
        /// Application the token was requested for, if declared.
        requester: Option<String>,
    },

    /// A request was refused because the socket cannot be shared with it.
    ShareDenied {
        /// Endpoint of the socket.
        endpoint: String,
        /// Requested share mode.
        share_mode: ShareMode,
        /// Requested share name.
        share_name: String,
    },

    /// An application picked up the socket behind a token.
    SocketPickedUp {
        /// The token.
        token: String,
        /// Endpoint of the socket.
        endpoint: String,
        /// Application now holding the socket.
        application: String,
    },

    /// A token was released.
    TokenDropped {
        /// The token.
        token: String,
        /// Endpoint of the socket.
        endpoint: String,
        /// Application the token was attributed to, if any.
        application: Option<String>,
    },

    /// A token was not picked up before its deadline.
    TokenExpired {
        /// The token.
        token: String,
        /// Endpoint of the socket.
        endpoint: String,
    },

    /// All tokens of an application were reclaimed.
    ApplicationDropped {
        /// The application handle.
        application: String,
        /// Number of tokens reclaimed.
        tokens: usize,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_created_serialization() {
        let event = AuditEvent::SocketCreated {
            endpoint: "tcp://0.0.0.0:53".to_string(),
            fd: 7,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"socket_created\""));
        assert!(json.contains("\"endpoint\":\"tcp://0.0.0.0:53\""));
        assert!(json.contains("\"fd\":7"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_token_issued_serialization() {
        let event = AuditEvent::TokenIssued {
            token: "t-1".to_string(),
            endpoint: "udp://[::]:53".to_string(),
            share_mode: ShareMode::SameApp,
            share_name: "resolver".to_string(),
            requester: None,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"token_issued\""));
        assert!(json.contains("\"share_mode\":\"SAMEAPP\""));
        assert!(json.contains("\"share_name\":\"resolver\""));
        assert!(json.contains("\"requester\":null"));
    }

    #[test]
    fn test_creator_failed_serialization() {
        let event = AuditEvent::CreatorFailed {
            endpoint: "tcp://0.0.0.0:53".to_string(),
            reason: Some(SocketFailure::AddressInUse),
            fatal: false,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"creator_failed\""));
        assert!(json.contains("\"reason\":\"address_in_use\""));
        assert!(json.contains("\"fatal\":false"));
    }

    #[test]
    fn test_application_dropped_serialization() {
        let event = AuditEvent::ApplicationDropped {
            application: "1234".to_string(),
            tokens: 3,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"application_dropped\""));
        assert!(json.contains("\"application\":\"1234\""));
        assert!(json.contains("\"tokens\":3"));
    }
}
