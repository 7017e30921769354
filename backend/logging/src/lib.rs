//! Telemetry and structured logging for chatloom.
//!
//! Console plus optional rolling NDJSON file output, secret redaction, and
//! per-conversation lifecycle events.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{ConversationEvent, ConversationEventLogger, EventLogEntry};
pub use logger::{init_logger, LoggerGuard};
pub use redact::redact_sensitive_data;
