//! Conversation Event Logger
//!
//! Lifecycle events of a conversation, emitted under the
//! `conversation_events` target so they can be routed to their own sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    Created {
        user_id: String,
        model: String,
    },
    MessageAppended {
        role: String,
        content: String,
        tokens: u32,
        evicted: usize,
        token_usage: u32,
    },
    CompletionFinished {
        deltas: usize,
        content: String,
        tokens: u32,
        evicted: usize,
        token_usage: u32,
    },
    CompletionFailed {
        error_msg: String,
    },
    Ended,
}

impl ConversationEvent {
    fn redacted(mut self) -> Self {
        match &mut self {
            ConversationEvent::MessageAppended { content, .. }
            | ConversationEvent::CompletionFinished { content, .. } => {
                *content = redact_sensitive_data(content);
            }
            ConversationEvent::CompletionFailed { error_msg } => {
                *error_msg = redact_sensitive_data(error_msg);
            }
            ConversationEvent::Created { .. } | ConversationEvent::Ended => {}
        }
        self
    }
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: ConversationEvent,
}

impl EventLogEntry {
    pub fn new(conversation_id: &str, event: ConversationEvent) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            timestamp: Utc::now(),
            event: event.redacted(),
        }
    }
}

pub struct ConversationEventLogger;

impl ConversationEventLogger {
    /// Redact and emit one event.
    pub fn log_event(conversation_id: &str, event: ConversationEvent) {
        let entry = EventLogEntry::new(conversation_id, event);
        let json = serde_json::to_string(&entry).unwrap_or_default();
        info!(target: "conversation_events", conversation_id, event = %json, "Conversation event");
    }
}
