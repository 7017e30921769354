pub mod conversation;
pub mod error;
pub mod message;
pub mod tokens;
pub mod traits;
pub mod types;

pub use conversation::{Conversation, ConversationParts, ConversationStatus};
pub use error::{ChatError, ErrorKind, ResultExt};
pub use message::{Message, PromptMessage, Role};
pub use tokens::estimate_tokens;
pub use traits::{
    CompletionChunk, CompletionProvider, CompletionRequest, CompletionStream, ConversationStore,
};
pub use types::{ConversationConfig, Model};
