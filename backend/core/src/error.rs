use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for chatloom.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conversation {0} has ended, no more messages allowed")]
    ConversationEnded(String),

    #[error("completion provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("completion cancelled")]
    Cancelled,

    #[error("completion timed out after {0:?}")]
    TimedOut(Duration),

    #[error("output sink closed by consumer")]
    SinkClosed,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ChatError>,
    },
}

/// The kind of a [`ChatError`], independent of any context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    ConversationEnded,
    Provider,
    Storage,
    Cancelled,
    TimedOut,
    SinkClosed,
}

impl ChatError {
    pub fn provider(provider: impl Into<String>, message: impl fmt::Display) -> Self {
        ChatError::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn storage(message: impl fmt::Display) -> Self {
        ChatError::Storage(message.to_string())
    }

    /// Wrap this error with the operation that was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        ChatError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::NotFound(_) => ErrorKind::NotFound,
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::ConversationEnded(_) => ErrorKind::ConversationEnded,
            ChatError::Provider { .. } => ErrorKind::Provider,
            ChatError::Storage(_) => ErrorKind::Storage,
            ChatError::Cancelled => ErrorKind::Cancelled,
            ChatError::TimedOut(_) => ErrorKind::TimedOut,
            ChatError::SinkClosed => ErrorKind::SinkClosed,
            ChatError::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Extension for attaching operation context to `Result<T, ChatError>`.
pub trait ResultExt<T> {
    fn context(self, context: &str) -> Result<T, ChatError>;
}

impl<T> ResultExt<T> for Result<T, ChatError> {
    fn context(self, context: &str) -> Result<T, ChatError> {
        self.map_err(|e| e.context(context))
    }
}
