use crate::config::Provider;
use crate::error::AssistantError;
use serde::Deserialize;
use std::time::Duration;

/// Create an HTTP client whose every request is bounded by `timeout_secs`
pub(crate) fn create_http_client(
    provider: Provider,
    timeout_secs: u64,
) -> Result<reqwest::Client, AssistantError> {
    let builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(timeout_secs.min(10)));
    // The local server is never behind the user's HTTP proxy
    let builder = match provider {
        Provider::Local => builder.no_proxy(),
        Provider::Cloud => builder,
    };
    builder
        .build()
        .map_err(|e| {
            AssistantError::connection(provider, format!("failed to create HTTP client: {}", e))
        })
}

/// Map a transport-level reqwest failure onto the error taxonomy
pub(crate) fn map_transport_error(
    provider: Provider,
    err: reqwest::Error,
    timeout_secs: u64,
) -> AssistantError {
    // Request URLs may carry the API key as a query parameter; never echo them.
    let err = err.without_url();
    if err.is_timeout() {
        AssistantError::Timeout {
            provider,
            secs: timeout_secs,
        }
    } else if err.is_connect() {
        let message = match provider {
            Provider::Local => "service not running".to_string(),
            Provider::Cloud => "could not connect to the cloud API".to_string(),
        };
        AssistantError::connection(provider, message)
    } else if err.is_decode() || err.is_body() {
        AssistantError::generation(provider, format!("failed to read response body: {}", err))
    } else {
        AssistantError::connection(provider, err.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    /// `{"error": "model 'x' not found"}` (local server)
    Text(String),
    /// `{"error": {"message": "..."}}` (cloud API)
    Object { message: String },
}

/// Extract the `error` message from a JSON error body, if the body has one
pub(crate) fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let message = match parsed.error {
        ErrorDetail::Text(s) => s,
        ErrorDetail::Object { message } => message,
    };
    Some(truncate_str(message.trim(), 200).to_string())
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_text_and_object_shapes() {
        assert_eq!(
            error_message(r#"{"error": "model 'm1' not found"}"#).as_deref(),
            Some("model 'm1' not found")
        );
        assert_eq!(
            error_message(r#"{"error": {"code": 400, "message": "API key not valid"}}"#).as_deref(),
            Some("API key not valid")
        );
        assert_eq!(error_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn test_truncate_str_is_char_safe() {
        assert_eq!(truncate_str("héllo", 2), "hé");
        assert_eq!(truncate_str("abc", 10), "abc");
    }
}
