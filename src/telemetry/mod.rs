//! Telemetry and audit logging for sockcache.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): socket lifecycle events go to syslog as JSON
//! - **Debug logging** (tracing): development logs go to stderr via `tracing`
//! - These are completely separate concerns
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"socket_picked_up","token":"…","endpoint":"udp://0.0.0.0:53","application":"4711"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, TimestampedEvent};
pub use self::syslog::{AuditLogger, SYSLOG_TAG};
