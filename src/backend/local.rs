//! Client for the locally hosted model server (Ollama wire format)
//!
//! Availability is checked with `/api/tags`, missing models are fetched with
//! `/api/pull`, and completions go through `/api/generate` with the whole
//! conversation flattened into one prompt.

use super::http::{create_http_client, error_message, map_transport_error, truncate_str};
use crate::config::{ConfigStore, Provider, ProviderConfig};
use crate::error::{AssistantError, Result};
use crate::message::{build_prompt, ChatMessage, GenerationOptions};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

const TOP_P: f32 = 0.9;
const REPEAT_PENALTY: f32 = 1.1;

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SamplingOptions {
    temperature: f32,
    num_predict: u32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Pick the model to use from what is installed.
///
/// The primary model wins when installed; otherwise the first installed
/// fallback, in configured order.
pub fn select_model(
    installed: &BTreeSet<String>,
    primary: &str,
    fallbacks: &[String],
) -> Result<String> {
    std::iter::once(primary)
        .chain(fallbacks.iter().map(String::as_str))
        .find(|m| installed.contains(*m))
        .map(str::to_string)
        .ok_or_else(|| {
            AssistantError::model_unavailable(format!(
                "none of {} or its {} fallback(s) are installed",
                primary,
                fallbacks.len()
            ))
        })
}

/// Talks to the local model server configured in the [`ConfigStore`]
#[derive(Debug, Clone)]
pub struct LocalClient {
    config: ConfigStore,
}

impl LocalClient {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }

    fn endpoint(config: &ProviderConfig, path: &str) -> Result<Url> {
        config.local_endpoint.join(path).map_err(|e| {
            AssistantError::Config(format!(
                "invalid local endpoint '{}': {}",
                config.local_endpoint, e
            ))
        })
    }

    /// Names of the models installed on the local server.
    ///
    /// Fails with a connection error when the server is not running.
    pub async fn check_availability(&self) -> Result<BTreeSet<String>> {
        let config = self.config.get();
        let url = Self::endpoint(&config, "api/tags")?;
        let timeout = config.status_timeout_secs;
        let client = create_http_client(Provider::Local, timeout)?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| map_transport_error(Provider::Local, e, timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(Provider::Local, e, timeout))?;

        if !status.is_success() {
            return Err(AssistantError::Service {
                provider: Provider::Local,
                status: status.as_u16(),
                message: error_message(&text)
                    .unwrap_or_else(|| truncate_str(&text, 200).to_string()),
            });
        }

        let tags: TagsResponse = serde_json::from_str(&text).map_err(|e| {
            AssistantError::generation(Provider::Local, format!("malformed model list: {}", e))
        })?;
        let installed: BTreeSet<String> = tags.models.into_iter().map(|m| m.name).collect();
        tracing::debug!(count = installed.len(), "local models listed");
        Ok(installed)
    }

    /// Download a model. Blocks until the server reports completion.
    pub async fn pull_model(&self, name: &str) -> Result<()> {
        let config = self.config.get();
        let url = Self::endpoint(&config, "api/pull")?;
        let timeout = config.pull_timeout_secs;
        let client = create_http_client(Provider::Local, timeout)?;

        tracing::info!(model = name, "pulling model");
        let response = client
            .post(url)
            .json(&PullRequest {
                name,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(Provider::Local, e, timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(Provider::Local, e, timeout))?;

        // A 200 can still carry {"error": ...} when the registry rejects the name
        if let Some(message) = error_message(&text) {
            return Err(AssistantError::model_unavailable(format!(
                "pull of {} failed: {}",
                name, message
            )));
        }
        if !status.is_success() {
            return Err(AssistantError::model_unavailable(format!(
                "pull of {} failed with status {}",
                name, status
            )));
        }
        tracing::info!(model = name, "model pulled");
        Ok(())
    }

    /// Decide which model serves this call, pulling one if none is installed.
    ///
    /// At most one pull is attempted per call. A failed pull is not fatal to
    /// the process; the call fails with `ModelUnavailable`.
    pub async fn resolve_model(
        &self,
        installed: &BTreeSet<String>,
        requested: Option<&str>,
    ) -> Result<String> {
        let config = self.config.get();

        let wanted = match requested {
            Some(model) if installed.contains(model) => return Ok(model.to_string()),
            Some(model) => model.to_string(),
            None => match select_model(installed, &config.primary_model, &config.fallback_models)
            {
                Ok(model) => return Ok(model),
                Err(_) => config.primary_model.clone(),
            },
        };

        match self.pull_model(&wanted).await {
            Ok(()) => Ok(wanted),
            Err(err) => {
                tracing::warn!(model = %wanted, "on-demand pull failed: {}", err);
                Err(match err {
                    AssistantError::ModelUnavailable { .. } => err,
                    other => AssistantError::model_unavailable(format!(
                        "{} is not installed and could not be pulled ({})",
                        wanted, other
                    )),
                })
            }
        }
    }

    /// Run one completion against `model`
    pub async fn complete(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let config = self.config.get();
        let url = Self::endpoint(&config, "api/generate")?;
        let timeout = config.request_timeout_secs;
        let client = create_http_client(Provider::Local, timeout)?;

        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: SamplingOptions {
                temperature: options.temperature_or_default(),
                num_predict: options.max_tokens_or_default(),
                top_p: TOP_P,
                repeat_penalty: REPEAT_PENALTY,
            },
        };

        tracing::debug!(model, prompt_chars = prompt.len(), "local generate");
        let response = client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error(Provider::Local, e, timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(Provider::Local, e, timeout))?;

        if status == StatusCode::NOT_FOUND {
            return Err(AssistantError::model_unavailable(
                error_message(&text).unwrap_or_else(|| format!("model '{}' not found", model)),
            ));
        }
        if !status.is_success() {
            return Err(AssistantError::Service {
                provider: Provider::Local,
                status: status.as_u16(),
                message: error_message(&text)
                    .unwrap_or_else(|| truncate_str(&text, 200).to_string()),
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|e| {
            AssistantError::generation(
                Provider::Local,
                format!("malformed response ({}): {}", e, truncate_str(&text, 120)),
            )
        })?;
        match parsed.response {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(AssistantError::generation(
                Provider::Local,
                "empty response body",
            )),
        }
    }

    /// Full local path: availability, model resolution, prompt, completion.
    /// Returns the text and the model that produced it.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<(String, String)> {
        let installed = self.check_availability().await?;
        let model = self.resolve_model(&installed, options.model.as_deref()).await?;
        let prompt = build_prompt(messages);
        let text = self.complete(&prompt, &model, options).await?;
        Ok((text, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{refused_endpoint, StubServer};
    use crate::config::ConfigUpdate;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn installed(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn store_for(endpoint: Url) -> ConfigStore {
        let store = ConfigStore::in_memory(ProviderConfig::default());
        store
            .update(
                ConfigUpdate::default()
                    .local_endpoint(endpoint)
                    .primary_model("m1")
                    .fallback_models(vec!["m2".to_string(), "m3".to_string()]),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_select_model_prefers_first_installed_fallback() {
        let fallbacks = vec!["m2".to_string(), "m3".to_string()];
        let model = select_model(&installed(&["m2", "m3"]), "m1", &fallbacks).unwrap();
        assert_eq!(model, "m2");
    }

    #[test]
    fn test_select_model_prefers_primary() {
        let fallbacks = vec!["m2".to_string()];
        let model = select_model(&installed(&["m1", "m2"]), "m1", &fallbacks).unwrap();
        assert_eq!(model, "m1");
    }

    #[test]
    fn test_select_model_nothing_installed() {
        let fallbacks = vec!["m2".to_string(), "m3".to_string()];
        let err = select_model(&BTreeSet::new(), "m1", &fallbacks).unwrap_err();
        assert!(matches!(err, AssistantError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_sampling_options_wire_names() {
        let value = serde_json::to_value(SamplingOptions {
            temperature: 0.5,
            num_predict: 10,
            top_p: TOP_P,
            repeat_penalty: REPEAT_PENALTY,
        })
        .unwrap();
        assert!(value.get("numPredict").is_some());
        assert!(value.get("topP").is_some());
        assert!(value.get("repeatPenalty").is_some());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let config = ProviderConfig {
            local_endpoint: Url::parse("http://host:11434/ollama").unwrap(),
            ..Default::default()
        };
        let store = ConfigStore::in_memory(config);
        let url = LocalClient::endpoint(&store.get(), "api/tags").unwrap();
        assert_eq!(url.as_str(), "http://host:11434/ollama/api/tags");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let client = LocalClient::new(store_for(refused_endpoint()));
        let err = client.check_availability().await.unwrap_err();
        assert_eq!(
            err,
            AssistantError::connection(Provider::Local, "service not running")
        );
    }

    #[tokio::test]
    async fn test_generate_uses_fallback_and_flat_prompt() {
        let server = StubServer::start(|hits| {
            Router::new()
                .route(
                    "/api/tags",
                    get(|| async { Json(json!({"models": [{"name": "m3"}, {"name": "m2"}]})) }),
                )
                .route(
                    "/api/generate",
                    post(move |Json(body): Json<Value>| {
                        let hits = hits.clone();
                        async move {
                            hits.record(body.clone());
                            Json(json!({
                                "response": format!("{} via {}", body["prompt"].as_str().unwrap_or(""), body["model"].as_str().unwrap_or(""))
                            }))
                        }
                    }),
                )
        })
        .await;

        let client = LocalClient::new(store_for(server.url()));
        let messages = vec![ChatMessage::system("a"), ChatMessage::user("b")];
        let (text, model) = client
            .generate(&messages, &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(model, "m2");
        assert_eq!(text, "System: a\n\nHuman: b via m2");
        let body = server.hits.last().unwrap();
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["options"]["numPredict"], json!(4096));
    }

    #[tokio::test]
    async fn test_missing_model_pull_failure_is_model_unavailable() {
        let server = StubServer::start(|hits| {
            Router::new()
                .route("/api/tags", get(|| async { Json(json!({"models": []})) }))
                .route(
                    "/api/pull",
                    post(move |Json(body): Json<Value>| {
                        let hits = hits.clone();
                        async move {
                            hits.record(body);
                            (
                                AxumStatus::INTERNAL_SERVER_ERROR,
                                Json(json!({"error": "pull model manifest: file does not exist"})),
                            )
                        }
                    }),
                )
        })
        .await;

        let client = LocalClient::new(store_for(server.url()));
        let err = client
            .generate(&[ChatMessage::user("hi")], &GenerationOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AssistantError::ModelUnavailable { .. }));
        // Exactly one pull, for the primary model
        assert_eq!(server.hits.count(), 1);
        assert_eq!(server.hits.last().unwrap()["name"], json!("m1"));
    }

    #[tokio::test]
    async fn test_missing_model_is_pulled_then_used() {
        let server = StubServer::start(|hits| {
            Router::new()
                .route("/api/tags", get(|| async { Json(json!({"models": []})) }))
                .route(
                    "/api/pull",
                    post(|| async { Json(json!({"status": "success"})) }),
                )
                .route(
                    "/api/generate",
                    post(move |Json(body): Json<Value>| {
                        let hits = hits.clone();
                        async move {
                            hits.record(body);
                            Json(json!({"response": "pulled and ran"}))
                        }
                    }),
                )
        })
        .await;

        let client = LocalClient::new(store_for(server.url()));
        let (text, model) = client
            .generate(&[ChatMessage::user("hi")], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "pulled and ran");
        assert_eq!(model, "m1");
    }

    #[tokio::test]
    async fn test_empty_response_is_generation_error() {
        let server = StubServer::start(|_| {
            Router::new().route(
                "/api/generate",
                post(|| async { Json(json!({"response": "  "})) }),
            )
        })
        .await;

        let client = LocalClient::new(store_for(server.url()));
        let err = client
            .complete("Human: hi", "m1", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AssistantError::Generation {
                provider: Provider::Local,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_model_404_is_model_unavailable() {
        let server = StubServer::start(|_| {
            Router::new().route(
                "/api/generate",
                post(|| async {
                    (
                        AxumStatus::NOT_FOUND,
                        Json(json!({"error": "model 'm9' not found"})),
                    )
                }),
            )
        })
        .await;

        let client = LocalClient::new(store_for(server.url()));
        let err = client
            .complete("Human: hi", "m9", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, AssistantError::model_unavailable("model 'm9' not found"));
    }

    #[tokio::test]
    async fn test_slow_generation_times_out() {
        let server = StubServer::start(|_| {
            Router::new()
                .route(
                    "/api/tags",
                    get(|| async { Json(json!({"models": [{"name": "m1"}]})) }),
                )
                .route(
                    "/api/generate",
                    post(|| async {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        Json(json!({"response": "too late"}))
                    }),
                )
        })
        .await;

        let store = ConfigStore::in_memory(ProviderConfig {
            local_endpoint: server.url(),
            primary_model: "m1".to_string(),
            request_timeout_secs: 1,
            ..Default::default()
        });
        let client = LocalClient::new(store);
        let err = client
            .generate(&[ChatMessage::user("hi")], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AssistantError::Timeout {
                provider: Provider::Local,
                secs: 1
            }
        );
    }
}
