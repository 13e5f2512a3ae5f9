//! OpenAI-compatible chat completion client.
//!
//! Works with OpenRouter and any other service implementing the
//! `/chat/completions` API, including its `stream: true` mode.

use super::{check_status, UpstreamError};
use crate::chat::models::ChatMessage;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Raw upstream response body, chunked however the network delivered it.
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Requests a complete, non-streamed reply.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, UpstreamError>;

    /// Opens a streamed completion. A non-success status is reported here,
    /// before any byte of the body is handed out.
    async fn open_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ByteStream, UpstreamError>;
}

pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    referer: String,
    title: String,
    timeout: Duration,
}

impl OpenRouterClient {
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "https://openrouter.ai/api/v1").
    /// * `api_key` - Optional bearer token.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            referer: "https://github.com/".to_string(),
            title: "Persona Server".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, body: &CompletionRequest<'_>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder
    }
}

#[async_trait]
impl ChatCompletionClient for OpenRouterClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
        let body = CompletionRequest::new(model, messages, false);

        debug!(
            model = %model,
            message_count = messages.len(),
            "Sending completion request"
        );

        let response = self
            .request(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;
        let response = check_status(response).await?;

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            UpstreamError::InvalidResponse(format!("Failed to parse completion response: {}", e))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| UpstreamError::InvalidResponse("No choices in response".to_string()))
    }

    async fn open_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ByteStream, UpstreamError> {
        let body = CompletionRequest::new(model, messages, true);

        debug!(
            model = %model,
            message_count = messages.len(),
            "Opening streamed completion"
        );

        // No total timeout here: the body stays open for as long as the
        // model keeps producing tokens.
        let response = self
            .request(&body)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;
        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map_err(UpstreamError::from_reqwest)
            .boxed())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> CompletionRequest<'a> {
    fn new(model: &'a str, messages: &'a [ChatMessage], stream: bool) -> Self {
        Self {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            stream,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        WireMessage {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_drops_timestamps_and_stream_flag_when_off() {
        let messages = vec![ChatMessage::system("be nice"), ChatMessage::user("hello")];
        let value = serde_json::to_value(CompletionRequest::new("m1", &messages, false)).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "model": "m1",
                "messages": [
                    {"role": "system", "content": "be nice"},
                    {"role": "user", "content": "hello"}
                ]
            })
        );
    }

    #[test]
    fn streamed_request_sets_flag() {
        let messages = vec![ChatMessage::user("hello")];
        let value = serde_json::to_value(CompletionRequest::new("m1", &messages, true)).unwrap();
        assert_eq!(value["stream"], true);
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let client = OpenRouterClient::new("http://localhost:1234/v1/", None);
        assert_eq!(client.base_url, "http://localhost:1234/v1");
    }
}
