use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// A completion model and its context-window ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    /// Maximum number of tokens the live window may hold.
    pub max_tokens: u32,
}

impl Model {
    pub fn new(name: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            name: name.into(),
            max_tokens,
        }
    }
}

/// Generation parameters bound to a conversation at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub model: Model,
    /// 0.0 to 2.0
    pub temperature: f32,
    /// 0.0 to 1.0
    pub top_p: f32,
    /// Number of choices to generate.
    pub n: u32,
    pub stop: Vec<String>,
    /// Cap on generated output tokens.
    pub max_tokens: u32,
    /// -2.0 to 2.0
    pub presence_penalty: f32,
    /// -2.0 to 2.0
    pub frequency_penalty: f32,
}

impl ConversationConfig {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            stop: Vec::new(),
            max_tokens: 256,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }

    /// Check every declared bound; reports the first violated field.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.model.name.trim().is_empty() {
            return Err(ChatError::Validation("model name is empty".into()));
        }
        if self.model.max_tokens == 0 {
            return Err(ChatError::Validation(
                "model max_tokens must be positive".into(),
            ));
        }
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        if self.n == 0 {
            return Err(ChatError::Validation("n must be positive".into()));
        }
        if self.max_tokens == 0 {
            return Err(ChatError::Validation("max_tokens must be positive".into()));
        }
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        Ok(())
    }
}

fn check_range(field: &str, value: f32, min: f32, max: f32) -> Result<(), ChatError> {
    // NaN fails both comparisons and is rejected here.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ChatError::Validation(format!(
            "{field} must be between {min} and {max}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config() -> ConversationConfig {
        ConversationConfig::new(Model::new("gpt-4o-mini", 4096))
    }

    #[test]
    fn default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let mut cfg = config();
        cfg.temperature = 2.5;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("temperature"));

        cfg.temperature = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn penalties_and_top_p_are_bounded() {
        let mut cfg = config();
        cfg.presence_penalty = -2.0;
        cfg.frequency_penalty = 2.0;
        assert!(cfg.validate().is_ok());

        cfg.top_p = 1.1;
        assert!(cfg.validate().unwrap_err().to_string().contains("top_p"));
    }

    #[test]
    fn zero_model_budget_is_rejected() {
        let cfg = ConversationConfig::new(Model::new("tiny", 0));
        assert!(cfg.validate().is_err());
    }
}
