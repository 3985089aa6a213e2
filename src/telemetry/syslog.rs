//! Syslog integration for audit logging.
//!
//! All audit events are logged to syslog with the `SOCKCACHE` tag.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "SOCKCACHE";

type SyslogWriter = syslog::Logger<syslog::LoggerBackend, Formatter3164>;

/// Where audit events end up.
enum Sink {
    Null,
    /// Syslog writer protected by a mutex for interior mutability.
    Syslog(Mutex<SyslogWriter>),
    Callback(Box<dyn Fn(&AuditEvent) + Send + Sync>),
}

/// Audit logger that writes structured JSON events to syslog.
///
/// Uses interior mutability (Mutex) so it can be shared behind an `Arc`
/// between the cache and the expiry sweeper.
pub struct AuditLogger {
    sink: Sink,
}

impl AuditLogger {
    /// Create a new audit logger connected to syslog.
    ///
    /// Uses Unix socket connection to local syslog daemon.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer =
            syslog::unix(formatter).map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            sink: Sink::Syslog(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { sink: Sink::Null }
    }

    /// Create an audit logger that hands every event to `callback`.
    ///
    /// Lets a hosting process route events into its own audit trail.
    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(&AuditEvent) + Send + Sync + 'static,
    {
        Self {
            sink: Sink::Callback(Box::new(callback)),
        }
    }

    /// Log an audit event to syslog.
    ///
    /// The event is serialized to JSON with an ISO8601 timestamp.
    /// If this is a null logger, the event is silently discarded.
    pub fn log(&self, event: AuditEvent) {
        let writer = match &self.sink {
            Sink::Null => return,
            Sink::Callback(callback) => {
                callback(&event);
                return;
            }
            Sink::Syslog(writer) => writer,
        };

        let json = match Self::render(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to acquire syslog writer lock: {}", e);
            }
        }
        debug!("Logged audit event: {}", json);
    }

    /// Render an event as the JSON line written to syslog.
    pub fn render(event: &AuditEvent) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(&event.with_timestamp())?)
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        matches!(self.sink, Sink::Null)
    }
}
