//! Chat messages and per-request generation options

use crate::error::{AssistantError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default sampling temperature when the caller does not set one
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default output budget when the caller does not set one
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Label used when a conversation is flattened into a single prompt
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "Human",
            Role::Assistant => "Assistant",
        }
    }
}

/// One turn of a conversation. Sequences are ordered oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Stamp the message with the current time
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(Utc::now());
        self
    }
}

/// Flatten a conversation into the single text block the local backend accepts.
///
/// Each message becomes `"<Label>: <content>"` and messages are joined with a
/// blank line, preserving order.
pub fn build_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Per-request knobs. Absent fields fall back to provider defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Streaming is not supported; must stay false.
    #[serde(default)]
    pub stream: bool,
}

impl GenerationOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature_or_default(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens_or_default(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(AssistantError::InvalidOptions(format!(
                    "temperature {} is outside 0..=1",
                    t
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(AssistantError::InvalidOptions(
                "max tokens must be positive".to_string(),
            ));
        }
        if self.stream {
            return Err(AssistantError::InvalidOptions(
                "streaming responses are not supported".to_string(),
            ));
        }
        Ok(())
    }

    /// Same options minus the provider-specific model override
    pub(crate) fn without_model(&self) -> Self {
        Self {
            model: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_labels_and_order() {
        let messages = vec![ChatMessage::system("a"), ChatMessage::user("b")];
        assert_eq!(build_prompt(&messages), "System: a\n\nHuman: b");
    }

    #[test]
    fn test_build_prompt_keeps_history_order() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
            ChatMessage::user("third"),
        ];
        assert_eq!(
            build_prompt(&messages),
            "Human: first\n\nAssistant: second\n\nHuman: third"
        );
    }

    #[test]
    fn test_build_prompt_empty() {
        assert_eq!(build_prompt(&[]), "");
    }

    #[test]
    fn test_options_defaults() {
        let options = GenerationOptions::default();
        assert_eq!(options.temperature_or_default(), DEFAULT_TEMPERATURE);
        assert_eq!(options.max_tokens_or_default(), DEFAULT_MAX_TOKENS);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        let hot = GenerationOptions::default().with_temperature(1.5);
        assert!(matches!(
            hot.validate(),
            Err(AssistantError::InvalidOptions(_))
        ));

        let empty = GenerationOptions::default().with_max_tokens(0);
        assert!(empty.validate().is_err());

        let streaming = GenerationOptions {
            stream: true,
            ..Default::default()
        };
        assert!(streaming.validate().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::system("x")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"x"}"#);
    }
}
