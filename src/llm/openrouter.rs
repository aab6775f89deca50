//! OpenRouter provider with automatic retry for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::error::{LlmError, RetryConfig};
use super::{ChatMessage, Completion, LlmProvider, TokenUsage};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// OpenAI-compatible chat completions against OpenRouter.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    retry_config: RetryConfig,
}

impl OpenRouterProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_retry_config(api_key, RetryConfig::default())
    }

    pub fn with_retry_config(api_key: String, retry_config: RetryConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            retry_config,
        }
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    async fn execute_request(&self, request: &OpenRouterRequest<'_>) -> Result<Completion, LlmError> {
        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .bearer_auth(&self.api_key)
            .header("X-Title", "taskpilot")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network_error(format!("Request timeout: {}", e))
                } else {
                    LlmError::network_error(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), body, retry_after));
        }

        let parsed: OpenRouterResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::parse_error(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse_error("No choices in response"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage,
        })
    }

    async fn execute_with_retry(&self, request: &OpenRouterRequest<'_>) -> Result<Completion, LlmError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.execute_request(request).await {
                Ok(completion) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempt,
                            elapsed = ?start.elapsed(),
                            "OpenRouter request succeeded after retries"
                        );
                    }
                    return Ok(completion);
                }
                Err(error) if self.retry_config.should_retry(&error, attempt) => {
                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());
                    let delay = error.suggested_delay(attempt).min(remaining);
                    if delay.is_zero() {
                        return Err(error);
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        kind = %error.kind,
                        ?delay,
                        "OpenRouter request failed, retrying: {}",
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(attempt, "OpenRouter request failed: {}", error);
                    return Err(error);
                }
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let request = OpenRouterRequest { model, messages };
        tracing::debug!(model, "Sending request to OpenRouter");
        self.execute_with_retry(&request).await
    }
}

#[derive(Debug, Serialize)]
struct OpenRouterRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_request_shape() {
        let messages = vec![ChatMessage::new(Role::User, "hello")];
        let request = OpenRouterRequest {
            model: "openai/gpt-4o-mini",
            messages: &messages,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "openai/gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_response_parses_usage() {
        let body = r#"{"choices":[{"message":{"content":"ok"}}],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;
        let parsed: OpenRouterResponse = serde_json::from_str(body).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 3);
    }
}
