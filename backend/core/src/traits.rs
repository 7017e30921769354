use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::message::{PromptMessage, Role};
use crate::tokens::estimate_tokens;
use crate::types::{ConversationConfig, Model};

/// Persistence for conversation aggregates.
///
/// Implementations must return [`ChatError::NotFound`] from `find_by_id` on a
/// miss; the orchestrator branches on that kind to create a conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a conversation with its live window and evicted log.
    async fn find_by_id(&self, id: &str) -> Result<Conversation, ChatError>;

    /// Persist a freshly created conversation.
    async fn create(&self, conversation: &Conversation) -> Result<(), ChatError>;

    /// Overwrite a stored conversation: scalar fields are replaced and both
    /// message lists are rewritten in order.
    async fn save(&self, conversation: &Conversation) -> Result<(), ChatError>;
}

/// One incremental fragment of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub role: Option<Role>,
    pub delta: String,
}

impl CompletionChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            role: Some(Role::Assistant),
            delta: text.into(),
        }
    }
}

/// A lazily-produced sequence of chunks. The stream ending is the
/// end-of-stream signal; an `Err` item aborts the completion.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, ChatError>> + Send>>;

/// Request sent to a completion provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub n: u32,
    pub stop: Vec<String>,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub stream: bool,
}

impl CompletionRequest {
    /// Build a streaming request from a conversation's config and window.
    pub fn streaming(config: &ConversationConfig, messages: Vec<PromptMessage>) -> Self {
        Self {
            model: config.model.name.clone(),
            messages,
            temperature: config.temperature,
            top_p: config.top_p,
            n: config.n,
            stop: config.stop.clone(),
            max_tokens: config.max_tokens,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            stream: true,
        }
    }
}

/// A streaming LLM completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Token cost of `text` under `model`.
    fn count_tokens(&self, _model: &Model, text: &str) -> u32 {
        estimate_tokens(text)
    }

    /// Start a streaming completion.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn streaming_request_copies_config() {
        let mut config = ConversationConfig::new(Model::new("gpt-4o-mini", 1000));
        config.temperature = 0.2;
        config.stop = vec!["###".into()];
        config.max_tokens = 64;

        let prompt = vec![PromptMessage::from(&Message::user("hi", 1))];
        let req = CompletionRequest::streaming(&config, prompt.clone());

        assert!(req.stream);
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.max_tokens, 64);
        assert_eq!(req.stop, vec!["###".to_string()]);
        assert_eq!(req.messages, prompt);
    }
}
