//! What to do after a failed attempt
//!
//! The policy is a pure decision table; the gateway applies it and the
//! caller's orchestration layer collects whatever user input it asks for.

use crate::config::Provider;
use crate::error::AssistantError;

pub const OLLAMA_DOWNLOAD_URL: &str = "https://ollama.ai/download";

/// Outcome of consulting the policy for one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Ask the user whether to move to the cloud backend
    OfferProviderSwitch,
    /// Ask the user for a cloud API key
    PromptForCredential,
    /// Report the error as-is
    Surface,
}

/// The user's answer to [`RecoveryAction::OfferProviderSwitch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    SwitchToCloud,
    ShowSetupInstructions,
    Dismiss,
}

impl ProviderChoice {
    pub const ALL: [ProviderChoice; 3] = [
        ProviderChoice::SwitchToCloud,
        ProviderChoice::ShowSetupInstructions,
        ProviderChoice::Dismiss,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProviderChoice::SwitchToCloud => "Switch to the cloud backend",
            ProviderChoice::ShowSetupInstructions => "Show local setup instructions",
            ProviderChoice::Dismiss => "Dismiss",
        }
    }
}

pub struct RecoveryPolicy;

impl RecoveryPolicy {
    pub fn decide(provider: Provider, error: &AssistantError) -> RecoveryAction {
        match (provider, error) {
            (Provider::Local, AssistantError::Connection { .. })
            | (Provider::Local, AssistantError::Timeout { .. }) => {
                RecoveryAction::OfferProviderSwitch
            }
            (Provider::Cloud, AssistantError::InvalidCredential { .. })
            | (Provider::Cloud, AssistantError::CredentialRequired) => {
                RecoveryAction::PromptForCredential
            }
            _ => RecoveryAction::Surface,
        }
    }
}

/// How to get the local model server running
pub fn setup_instructions() -> String {
    format!(
        "To use the local backend:\n\
         \x20 1. Install Ollama from {}\n\
         \x20 2. Start it with `ollama serve`\n\
         \x20 3. Pull a model, e.g. `dattoham pull {}`\n\
         Then run your request again.",
        OLLAMA_DOWNLOAD_URL,
        crate::config::DEFAULT_PRIMARY_MODEL
    )
}
