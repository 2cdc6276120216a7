//! Provider gateway: one `generate` call, one backend, at most one retry
//!
//! A failed attempt is handed to [`RecoveryPolicy`] exactly once. When the
//! policy needs the user (a provider switch or an API key) the call returns a
//! suspension carrying everything needed to finish it. The caller collects
//! the answer however it likes and passes the suspension back to
//! [`Gateway::resume_provider_choice`] or [`Gateway::resume_credential`],
//! which run the single retry and never suspend again.

use crate::backend::{CloudClient, LocalClient};
use crate::config::{ConfigStore, ConfigUpdate, Provider};
use crate::error::{AssistantError, Result};
use crate::message::{build_prompt, ChatMessage, GenerationOptions};
use crate::recovery::{ProviderChoice, RecoveryAction, RecoveryPolicy};
use tracing::Instrument;
use uuid::Uuid;

/// A finished generation, attributed to the backend that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub provider: Provider,
    pub model: String,
    /// 1 for a first-attempt success, 2 after a recovery retry
    pub attempts: u8,
}

/// State of a call waiting for user input
#[derive(Debug)]
struct Pending {
    request_id: Uuid,
    messages: Vec<ChatMessage>,
    options: GenerationOptions,
    provider: Provider,
    error: AssistantError,
}

/// The local backend was unreachable; the user may move to the cloud
#[derive(Debug)]
pub struct ProviderSwitch {
    pending: Pending,
}

impl ProviderSwitch {
    pub fn error(&self) -> &AssistantError {
        &self.pending.error
    }

    pub fn choices(&self) -> &'static [ProviderChoice] {
        &ProviderChoice::ALL
    }

    pub fn request_id(&self) -> Uuid {
        self.pending.request_id
    }
}

/// The cloud backend needs an API key (none stored, or the stored one was rejected)
#[derive(Debug)]
pub struct CredentialRequest {
    pending: Pending,
}

impl CredentialRequest {
    pub fn error(&self) -> &AssistantError {
        &self.pending.error
    }

    /// True when a stored key was rejected, as opposed to never set
    pub fn was_rejected(&self) -> bool {
        matches!(self.pending.error, AssistantError::InvalidCredential { .. })
    }

    pub fn request_id(&self) -> Uuid {
        self.pending.request_id
    }
}

#[derive(Debug)]
pub enum Generation {
    Complete(Reply),
    Failed(AssistantError),
    NeedsProviderChoice(ProviderSwitch),
    NeedsCredential(CredentialRequest),
}

impl Generation {
    /// Collapse to a result, treating any suspension as a failure
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Generation::Complete(reply) => Ok(reply),
            Generation::Failed(err) => Err(err),
            Generation::NeedsProviderChoice(switch) => Err(switch.pending.error),
            Generation::NeedsCredential(request) => Err(request.pending.error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Gateway {
    config: ConfigStore,
    local: LocalClient,
    cloud: CloudClient,
}

impl Gateway {
    pub fn new(config: ConfigStore) -> Self {
        Self {
            local: LocalClient::new(config.clone()),
            cloud: CloudClient::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn local(&self) -> &LocalClient {
        &self.local
    }

    /// One attempt on `provider`. Returns the text and the model used.
    async fn attempt(
        &self,
        provider: Provider,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<(String, String)> {
        match provider {
            Provider::Local => self.local.generate(messages, options).await,
            Provider::Cloud => {
                let config = self.config.get();
                let credential = config.cloud_api_key.unwrap_or_default();
                let model = options
                    .model
                    .clone()
                    .unwrap_or_else(|| config.cloud_model.clone());
                let prompt = build_prompt(messages);
                let text = self.cloud.complete(&prompt, &credential, options).await?;
                Ok((text, model))
            }
        }
    }

    /// Generate a reply for `messages` on the active provider
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Generation {
        let request_id = Uuid::new_v4();
        let provider = self.config.get().active_provider;
        let span = tracing::info_span!("generate", %request_id, %provider);

        async move {
            if messages.is_empty() {
                return Generation::Failed(AssistantError::InvalidOptions(
                    "no messages to send".to_string(),
                ));
            }
            if let Err(err) = options.validate() {
                return Generation::Failed(err);
            }

            let error = match self.attempt(provider, messages, &options).await {
                Ok((text, model)) => {
                    tracing::debug!(%model, chars = text.len(), "generation complete");
                    return Generation::Complete(Reply {
                        text,
                        provider,
                        model,
                        attempts: 1,
                    });
                }
                Err(err) => err,
            };

            let action = RecoveryPolicy::decide(provider, &error);
            tracing::debug!(?action, "attempt failed: {}", error);
            let pending = Pending {
                request_id,
                messages: messages.to_vec(),
                options,
                provider,
                error,
            };
            match action {
                RecoveryAction::OfferProviderSwitch => {
                    Generation::NeedsProviderChoice(ProviderSwitch { pending })
                }
                RecoveryAction::PromptForCredential => {
                    Generation::NeedsCredential(CredentialRequest { pending })
                }
                RecoveryAction::Surface => Generation::Failed(pending.error),
            }
        }
        .instrument(span)
        .await
    }

    /// Finish a call suspended on a provider choice
    pub async fn resume_provider_choice(
        &self,
        switch: ProviderSwitch,
        choice: ProviderChoice,
    ) -> Generation {
        let pending = switch.pending;
        let span = tracing::info_span!("resume", request_id = %pending.request_id, ?choice);

        async move {
            match choice {
                ProviderChoice::SwitchToCloud => {
                    if let Err(err) = self
                        .config
                        .update_async(ConfigUpdate::default().provider(Provider::Cloud))
                        .await
                    {
                        tracing::warn!("provider switch was not saved: {}", err);
                    }
                    tracing::info!("switched active provider to cloud");
                    self.retry(pending, Provider::Cloud).await
                }
                ProviderChoice::ShowSetupInstructions | ProviderChoice::Dismiss => {
                    Generation::Failed(pending.error)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Finish a call suspended on a missing or rejected API key.
    ///
    /// `None` (or an empty key) means the user declined.
    pub async fn resume_credential(
        &self,
        request: CredentialRequest,
        key: Option<String>,
    ) -> Generation {
        let pending = request.pending;
        let span = tracing::info_span!("resume", request_id = %pending.request_id);

        async move {
            let key = match key.map(|k| k.trim().to_string()) {
                Some(k) if !k.is_empty() => k,
                _ => return Generation::Failed(AssistantError::CredentialRequired),
            };
            if let Err(err) = self
                .config
                .update_async(ConfigUpdate::default().cloud_api_key(key))
                .await
            {
                tracing::warn!("API key was not saved: {}", err);
            }
            self.retry(pending, Provider::Cloud).await
        }
        .instrument(span)
        .await
    }

    /// The single recovery retry. Its failure is final.
    async fn retry(&self, pending: Pending, provider: Provider) -> Generation {
        let options = if provider == pending.provider {
            pending.options
        } else {
            pending.options.without_model()
        };
        match self.attempt(provider, &pending.messages, &options).await {
            Ok((text, model)) => Generation::Complete(Reply {
                text,
                provider,
                model,
                attempts: 2,
            }),
            Err(err) => {
                tracing::debug!("retry failed: {}", err);
                Generation::Failed(err)
            }
        }
    }
}
