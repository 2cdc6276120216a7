//! Failure kinds for a single `generate` call
//!
//! Every variant is scoped to one request. `Display` says what failed,
//! `remedy()` says what the user can do about it.

use crate::config::Provider;
use thiserror::Error;

pub type Result<T, E = AssistantError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssistantError {
    /// Backend unreachable (refused, DNS, reset).
    #[error("{provider} backend unreachable: {message}")]
    Connection { provider: Provider, message: String },

    /// Backend did not answer within the configured timeout.
    #[error("{provider} backend timed out after {secs}s")]
    Timeout { provider: Provider, secs: u64 },

    /// No usable model is installed and none could be pulled.
    #[error("no usable model: {message}")]
    ModelUnavailable { message: String },

    /// The cloud backend rejected the stored API key. The key has been cleared.
    #[error("cloud API key rejected: {message}")]
    InvalidCredential { message: String },

    /// A cloud API key is needed and none was supplied.
    #[error("a cloud API key is required")]
    CredentialRequired,

    /// Transport succeeded but the body was malformed or empty.
    #[error("{provider} returned an unusable response: {message}")]
    Generation { provider: Provider, message: String },

    /// Non-success HTTP status not covered by a more specific kind.
    #[error("{provider} backend error {status}: {message}")]
    Service {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("invalid generation options: {0}")]
    InvalidOptions(String),

    /// Reading or writing persisted configuration failed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AssistantError {
    pub fn connection(provider: Provider, message: impl Into<String>) -> Self {
        Self::Connection {
            provider,
            message: message.into(),
        }
    }

    pub fn generation(provider: Provider, message: impl Into<String>) -> Self {
        Self::Generation {
            provider,
            message: message.into(),
        }
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
        }
    }

    /// Suggested next step for the user.
    pub fn remedy(&self) -> String {
        match self {
            Self::Connection {
                provider: Provider::Local,
                ..
            }
            | Self::Timeout {
                provider: Provider::Local,
                ..
            } => "Start the local model server (`ollama serve`) or switch with `dattoham provider cloud`."
                .to_string(),
            Self::Connection {
                provider: Provider::Cloud,
                ..
            }
            | Self::Timeout {
                provider: Provider::Cloud,
                ..
            } => "Check your network connection and try again.".to_string(),
            Self::ModelUnavailable { .. } => {
                "Install a model with `dattoham pull <model>` or `ollama pull <model>`.".to_string()
            }
            Self::InvalidCredential { .. } | Self::CredentialRequired => {
                "Run `dattoham setup` to store a valid Gemini API key.".to_string()
            }
            Self::Generation { .. } => {
                "Try again, or rephrase the request if the response was filtered.".to_string()
            }
            Self::Service { status, .. } if *status >= 500 => {
                "The service may be temporarily unavailable. Try again shortly.".to_string()
            }
            Self::Service { .. } => "Check the request and the configured model name.".to_string(),
            Self::InvalidOptions(_) => {
                "Temperature must be within 0..=1 and max tokens must be positive.".to_string()
            }
            Self::Config(_) => format!(
                "Check permissions on {}.",
                crate::config::ConfigStore::config_location()
            ),
        }
    }
}
