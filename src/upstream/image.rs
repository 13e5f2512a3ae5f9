//! Replicate prediction client used for image generation and inpainting.

use super::{check_status, UpstreamError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_INPAINT_VERSION: &str =
    "zsxkib/flux-dev-inpainting:11cca3274341de7aef06f04e4dab3d651ea8ac04eff003f23603d4fdf5b56ff0";
pub const DEFAULT_GENERATE_MODEL: &str = "black-forest-labs/flux-schnell";

/// Long-running image operations. Implementations must stop waiting as soon
/// as `cancel` fires and should release whatever they started upstream.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns the URL of the generated image.
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, UpstreamError>;

    /// Returns the URL of the inpainted image.
    async fn inpaint(
        &self,
        image_url: &str,
        mask_url: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, UpstreamError>;
}

pub struct ReplicateClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
    max_poll_attempts: u32,
    inpaint_version: String,
    generate_model: String,
}

impl ReplicateClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            poll_interval: Duration::from_secs(3),
            max_poll_attempts: 60,
            inpaint_version: DEFAULT_INPAINT_VERSION.to_string(),
            generate_model: DEFAULT_GENERATE_MODEL.to_string(),
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_poll_attempts = max_attempts;
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, UpstreamError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(UpstreamError::MissingApiKey("Replicate"))?;
        Ok(builder.header("Authorization", format!("Token {}", key)))
    }

    /// `model` is either `owner/name`, which goes through the model's own
    /// predictions endpoint, or `owner/name:version`.
    async fn create_prediction(&self, model: &str, input: Value) -> Result<Prediction, UpstreamError> {
        let (url, body) = match model.split_once(':') {
            Some((_, version)) if !version.is_empty() => (
                format!("{}/v1/predictions", self.base_url),
                json!({ "version": version, "input": input }),
            ),
            Some(_) => {
                return Err(UpstreamError::InvalidResponse(format!(
                    "invalid model version format: {}",
                    model
                )))
            }
            None => (
                format!("{}/v1/models/{}/predictions", self.base_url, model),
                json!({ "input": input }),
            ),
        };

        debug!(url = %url, "Creating prediction");
        let response = self
            .authorized(self.client.post(&url).json(&body))?
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;
        let response = check_status(response).await?;

        let prediction: Prediction = response.json().await.map_err(|e| {
            UpstreamError::InvalidResponse(format!("Failed to parse prediction: {}", e))
        })?;
        if prediction.id.is_empty() {
            return Err(UpstreamError::InvalidResponse(
                "no prediction ID returned from API".to_string(),
            ));
        }
        Ok(prediction)
    }

    async fn fetch_prediction(&self, id: &str) -> Result<Prediction, UpstreamError> {
        let url = format!("{}/v1/predictions/{}", self.base_url, id);
        let response = self
            .authorized(self.client.get(&url))?
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("Failed to parse prediction: {}", e)))
    }

    async fn cancel_prediction(&self, id: &str) {
        let url = format!("{}/v1/predictions/{}/cancel", self.base_url, id);
        let request = match self.authorized(self.client.post(&url)) {
            Ok(request) => request,
            Err(_) => return,
        };
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!("Cancelled prediction {}", id);
            }
            Ok(response) => {
                warn!("Cancelling prediction {} returned {}", id, response.status());
            }
            Err(e) => warn!("Failed to cancel prediction {}: {}", id, e),
        }
    }

    /// Polls until the prediction finishes, the attempts run out or `cancel`
    /// fires. Transient poll failures are retried.
    async fn wait_for(
        &self,
        mut prediction: Prediction,
        cancel: &CancellationToken,
    ) -> Result<String, UpstreamError> {
        for attempt in 0..self.max_poll_attempts {
            match prediction.status.as_str() {
                "succeeded" => return prediction.output_url(),
                "failed" | "canceled" => {
                    return Err(UpstreamError::PredictionFailed(
                        prediction.error.unwrap_or_else(|| prediction.status.clone()),
                    ))
                }
                _ => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.cancel_prediction(&prediction.id).await;
                    return Err(UpstreamError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.fetch_prediction(&prediction.id).await {
                Ok(next) => prediction = next,
                Err(e) => warn!(
                    "Error polling prediction {} (attempt {}, will retry): {}",
                    prediction.id,
                    attempt + 1,
                    e
                ),
            }
        }

        self.cancel_prediction(&prediction.id).await;
        Err(UpstreamError::Timeout)
    }

    async fn run(&self, model: &str, input: Value, cancel: &CancellationToken) -> Result<String, UpstreamError> {
        let prediction = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            created = self.create_prediction(model, input) => created?,
        };
        debug!(id = %prediction.id, status = %prediction.status, "Prediction created");
        self.wait_for(prediction, cancel).await
    }
}

#[async_trait]
impl ImageGenerator for ReplicateClient {
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, UpstreamError> {
        let input = json!({
            "prompt": prompt,
            "width": 512,
            "height": 512,
            "num_outputs": 1,
        });
        self.run(&self.generate_model, input, cancel).await
    }

    async fn inpaint(
        &self,
        image_url: &str,
        mask_url: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, UpstreamError> {
        let input = json!({
            "image": image_url,
            "mask": mask_url,
            "prompt": prompt,
            "num_outputs": 1,
        });
        self.run(&self.inpaint_version, input, cancel).await
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
}

impl Prediction {
    /// Output is a single URL for some models and a list for others.
    fn output_url(&self) -> Result<String, UpstreamError> {
        match &self.output {
            Value::String(url) => Ok(url.clone()),
            Value::Array(items) => match items.first() {
                Some(Value::String(url)) => Ok(url.clone()),
                Some(other) => Ok(other.to_string()),
                None => Err(UpstreamError::InvalidResponse(
                    "prediction succeeded but no output was returned".to_string(),
                )),
            },
            Value::Null => Err(UpstreamError::InvalidResponse(
                "prediction succeeded but no output was returned".to_string(),
            )),
            other => Ok(other.to_string()),
        }
    }
}
