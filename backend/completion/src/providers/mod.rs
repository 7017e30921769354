pub mod openai;
pub mod scripted;

pub use openai::OpenAiCompatibleProvider;
pub use scripted::ScriptedProvider;
