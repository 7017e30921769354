//! Conversation persistence.
//!
//! [`InMemoryConversationStore`] for tests and `--mock` runs,
//! [`SqliteConversationStore`] for durable storage.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryConversationStore;
pub use sqlite::SqliteConversationStore;
