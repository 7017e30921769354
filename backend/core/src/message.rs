use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;
use crate::types::Model;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ChatError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// A single utterance in a conversation.
///
/// Messages are never mutated after construction; the conversation only
/// hands them out by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Token cost, as reported by the provider's counting facility.
    pub tokens: u32,
    pub created_at: DateTime<Utc>,
    pub model: Option<Model>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, tokens: u32, model: Option<Model>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            tokens,
            created_at: Utc::now(),
            model,
        }
    }

    pub fn system(content: impl Into<String>, tokens: u32) -> Self {
        Self::new(Role::System, content, tokens, None)
    }

    pub fn user(content: impl Into<String>, tokens: u32) -> Self {
        Self::new(Role::User, content, tokens, None)
    }

    pub fn assistant(content: impl Into<String>, tokens: u32) -> Self {
        Self::new(Role::Assistant, content, tokens, None)
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }
}

/// A role/content pair in the shape providers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for PromptMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}
