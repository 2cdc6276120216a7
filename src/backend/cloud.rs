//! Client for the cloud inference API (Gemini `generateContent`)

use super::http::{create_http_client, error_message, map_transport_error, truncate_str};
use crate::config::{ConfigStore, ConfigUpdate, Provider, ProviderConfig};
use crate::error::{AssistantError, Result};
use crate::message::GenerationOptions;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use url::Url;

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

/// Pull the reply text out of a `generateContent` response.
///
/// Anything other than a non-empty `candidates[0].content.parts[0].text` is a
/// generation failure; a filtered prompt reports the block reason.
pub(crate) fn parse_response(body: &Value) -> Result<String> {
    if let Some(text) = body
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
    {
        if !text.trim().is_empty() {
            return Ok(text.to_string());
        }
    }

    let message = match body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        Some(reason) => format!("response was filtered ({})", reason),
        None => match body
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
        {
            Some(reason) => format!("no text in response (finish reason {})", reason),
            None => "no text in response".to_string(),
        },
    };
    Err(AssistantError::generation(Provider::Cloud, message))
}

/// Talks to the cloud API configured in the [`ConfigStore`]
#[derive(Debug, Clone)]
pub struct CloudClient {
    config: ConfigStore,
}

impl CloudClient {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }

    fn endpoint(config: &ProviderConfig, model: &str, credential: &str) -> Result<Url> {
        let mut url = config
            .cloud_endpoint
            .join(&format!("v1beta/models/{}:generateContent", model))
            .map_err(|e| {
                AssistantError::Config(format!(
                    "invalid cloud endpoint '{}': {}",
                    config.cloud_endpoint, e
                ))
            })?;
        url.query_pairs_mut().append_pair("key", credential);
        Ok(url)
    }

    /// Drop the stored key after the API rejected it, unless a different
    /// key was stored while the request was in flight
    async fn invalidate_credential(&self, rejected: &str) {
        if let Err(err) = self
            .config
            .update_async(ConfigUpdate::default().clear_cloud_api_key_if(rejected))
            .await
        {
            tracing::warn!("failed to clear rejected API key: {}", err);
        }
    }

    /// Run one completion with `credential`.
    ///
    /// A 400 or 401 means the key was rejected: it is cleared from the
    /// configuration before `InvalidCredential` is returned.
    pub async fn complete(
        &self,
        prompt: &str,
        credential: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        if credential.trim().is_empty() {
            return Err(AssistantError::CredentialRequired);
        }

        let credential = credential.trim();
        let config = self.config.get();
        let model = options.model.as_deref().unwrap_or(&config.cloud_model);
        let url = Self::endpoint(&config, model, credential)?;
        let timeout = config.request_timeout_secs;
        let client = create_http_client(Provider::Cloud, timeout)?;

        let request = GenerateContentRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: options.temperature_or_default(),
                max_output_tokens: options.max_tokens_or_default(),
            },
        };

        tracing::debug!(model, prompt_chars = prompt.len(), "cloud generateContent");
        let response = client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error(Provider::Cloud, e, timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(Provider::Cloud, e, timeout))?;

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            self.invalidate_credential(credential).await;
            tracing::info!(status = status.as_u16(), "cloud API key rejected");
            return Err(AssistantError::InvalidCredential {
                message: error_message(&text)
                    .unwrap_or_else(|| format!("request rejected with status {}", status)),
            });
        }
        if !status.is_success() {
            return Err(AssistantError::Service {
                provider: Provider::Cloud,
                status: status.as_u16(),
                message: error_message(&text)
                    .unwrap_or_else(|| truncate_str(&text, 200).to_string()),
            });
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            AssistantError::generation(Provider::Cloud, format!("malformed response: {}", e))
        })?;
        parse_response(&body)
    }
}
