use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Per-conversation mutual exclusion.
///
/// Two executions against the same conversation would each load, mutate and
/// save their own copy, and the later save would drop the earlier turn.
/// Transports hold the guard for the whole execution.
#[derive(Debug, Default, Clone)]
pub struct ConversationLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `conversation_id`.
    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Entries only referenced by the map are idle.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        trace!(conversation_id, "Waiting for conversation lock");
        lock.lock_owned().await
    }

    /// Number of conversations with a live or pending guard.
    pub async fn len(&self) -> usize {
        let map = self.inner.lock().await;
        map.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
