// HTTP client for the Claude API

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::retry::with_retry;
use super::types::{ChatRequest, Message, MessageRequest, MessageResponse};
use super::ChatModel;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct ClaudeModel {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl ClaudeModel {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: CLAUDE_API_URL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the endpoint, for tests and compatible proxies.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send_once(&self, request: &MessageRequest) -> Result<MessageResponse> {
        debug!(model = %request.model, "sending request to Claude API");

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .context("Failed to send request to Claude API")?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Claude API request failed\n\nStatus: {}\nBody: {}",
                status,
                error_body
            );
        }

        let message_response: MessageResponse = response
            .json()
            .await
            .context("Failed to parse Claude API response")?;

        Ok(message_response)
    }
}

#[async_trait]
impl ChatModel for ClaudeModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = MessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: (!request.system.is_empty()).then(|| request.system.clone()),
            temperature: request.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: request.user.clone(),
            }],
        };

        let response = with_retry(|| self.send_once(&body)).await?;
        Ok(response.text())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ClaudeModel::new("test-key".to_string());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_complete_extracts_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-api-key", "test-key")
            .with_status(200)
            .with_body(
                r#"{"content":[{"type":"text","text":"1. Label: greeting"}],"model":"claude-test","stop_reason":"end_turn"}"#,
            )
            .create_async()
            .await;

        let client = ClaudeModel::new("test-key".to_string())
            .unwrap()
            .with_base_url(server.url());
        let request = ChatRequest::new("You label codes.", "greeting");
        let text = client.complete(&request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "1. Label: greeting");
    }
}
