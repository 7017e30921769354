pub mod dto;
pub mod locks;
pub mod orchestrator;
pub mod providers;
pub mod sink;

pub use dto::{CompletionConfig, CompletionInput, CompletionOutput};
pub use locks::ConversationLocks;
pub use orchestrator::CompletionOrchestrator;
pub use providers::{OpenAiCompatibleProvider, ScriptedProvider};
pub use sink::{output_channel, OutputSink, OutputStream, DEFAULT_BUFFER_SIZE};
