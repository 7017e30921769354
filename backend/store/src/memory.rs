use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use chatloom_core::{ChatError, Conversation, ConversationStore};

/// Process-local store. Conversations are cloned in and out, so callers never
/// share a mutable aggregate with the store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find_by_id(&self, id: &str) -> Result<Conversation, ChatError> {
        self.conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    async fn create(&self, conversation: &Conversation) -> Result<(), ChatError> {
        let mut conversations = self.conversations.write().await;
        if conversations.contains_key(conversation.id()) {
            return Err(ChatError::storage(format!(
                "conversation {} already exists",
                conversation.id()
            )));
        }
        conversations.insert(conversation.id().to_string(), conversation.clone());
        debug!(id = %conversation.id(), "Created conversation in memory");
        Ok(())
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), ChatError> {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(conversation.id()) {
            Some(slot) => {
                *slot = conversation.clone();
                Ok(())
            }
            None => Err(ChatError::NotFound(conversation.id().to_string())),
        }
    }
}
