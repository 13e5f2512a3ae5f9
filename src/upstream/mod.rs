//! Clients for the third-party generation APIs.
//!
//! Both APIs sit behind traits so the HTTP layer and the job runner can be
//! exercised against in-process fakes.

pub mod chat;
pub mod image;

pub use chat::{ByteStream, ChatCompletionClient, OpenRouterClient};
pub use image::{ImageGenerator, ReplicateClient};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Prediction failed: {0}")]
    PredictionFailed(String),

    #[error("{0} API key is not configured")]
    MissingApiKey(&'static str),
}

impl UpstreamError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Connection(e.to_string())
        }
    }

    /// HTTP status code reported by the upstream, if the error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Api { status, .. } => Some(*status),
            UpstreamError::RateLimited => Some(429),
            _ => None,
        }
    }
}

/// Turns a non-success upstream response into an [`UpstreamError`],
/// consuming the body for the error message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.as_u16() == 429 {
        return Err(UpstreamError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(response)
}
