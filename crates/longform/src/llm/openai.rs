//! OpenAI-compatible chat completions backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{Completion, CompletionError, CompletionRequest, TextCompletion, Usage};

/// Client for any server speaking the `/chat/completions` protocol.
#[derive(Clone)]
pub struct OpenAiCompatible {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatible {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": &self.model,
            "messages": messages,
        });

        if let Some(max) = request.max_output_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }

        if let Some(ref schema) = request.schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": &schema.name,
                    "schema": &schema.schema,
                    "strict": false
                }
            });
        }

        body
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn map_transport_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout(Duration::ZERO)
    } else {
        CompletionError::provider(e.to_string())
    }
}

#[async_trait]
impl TextCompletion for OpenAiCompatible {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let body = self.request_body(&request);

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(ref key) = self.api_key {
            http = http.bearer_auth(key.expose_secret());
        }

        let response = http.send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("{} returned {}: {}", self.endpoint(), status, text);
            return Err(if status.is_server_error() {
                CompletionError::provider(message)
            } else {
                CompletionError::rejected(message)
            });
        }

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::provider(format!("Invalid response body: {}", e)))?;

        let text = api
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CompletionError::MalformedOutput("No choices in response".into()))?;

        let usage = api.usage.unwrap_or_default();
        tracing::debug!(
            operation = %request.operation,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion finished"
        );

        Ok(Completion {
            text,
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_includes_schema_and_limit() {
        let client = OpenAiCompatible::new("http://localhost:8080/v1/", "local-model");
        let request = CompletionRequest::new("style")
            .system("sys")
            .user("hello")
            .max_output_tokens(64)
            .schema("style_profile", serde_json::json!({"type": "object"}));

        let body = client.request_body(&request);
        assert_eq!(body["model"], "local-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "style_profile");
    }

    #[test]
    fn test_request_body_without_schema() {
        let client = OpenAiCompatible::new("http://localhost:8080/v1", "m");
        let body = client.request_body(&CompletionRequest::new("write").user("x"));
        assert!(body.get("response_format").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(&reqwest::header::HeaderMap::new()), None);
    }
}
