use serde::{Deserialize, Serialize};

use chatloom_core::{ConversationConfig, Model};

/// Generation settings supplied with every request.
///
/// `model_max_tokens` is the context-window budget; `max_tokens` caps the
/// generated output. `initial_system_message` is only used when the
/// conversation does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub model: String,
    pub model_max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub n: u32,
    #[serde(default)]
    pub stop: Vec<String>,
    pub max_tokens: u32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    pub initial_system_message: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            model_max_tokens: 4096,
            temperature: 0.7,
            top_p: 1.0,
            n: 1,
            stop: Vec::new(),
            max_tokens: 512,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            initial_system_message: "You are a helpful assistant.".to_string(),
        }
    }
}

impl CompletionConfig {
    pub fn model(&self) -> Model {
        Model::new(self.model.clone(), self.model_max_tokens)
    }

    pub fn conversation_config(&self) -> ConversationConfig {
        ConversationConfig {
            model: self.model(),
            temperature: self.temperature,
            top_p: self.top_p,
            n: self.n,
            stop: self.stop.clone(),
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
        }
    }
}

/// One user turn to run through the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionInput {
    /// Empty means "start a new conversation".
    #[serde(default)]
    pub conversation_id: String,
    pub user_id: String,
    pub user_message: String,
    pub config: CompletionConfig,
}

/// Both the partial records published while streaming and the final result.
///
/// `content` is cumulative: each record holds all text generated so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutput {
    pub conversation_id: String,
    pub user_id: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_config_uses_output_cap_not_budget() {
        let cfg = CompletionConfig {
            model_max_tokens: 8000,
            max_tokens: 300,
            ..Default::default()
        };
        let conv = cfg.conversation_config();
        assert_eq!(conv.model.max_tokens, 8000);
        assert_eq!(conv.max_tokens, 300);
        assert!(conv.validate().is_ok());
    }

    #[test]
    fn input_deserializes_without_conversation_id() {
        let json = serde_json::json!({
            "user_id": "u1",
            "user_message": "hello",
            "config": CompletionConfig::default(),
        });
        let input: CompletionInput = serde_json::from_value(json).unwrap();
        assert!(input.conversation_id.is_empty());
        assert_eq!(input.user_message, "hello");
    }
}
