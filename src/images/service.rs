use super::models::{GenerateRequest, Image, ImageKind, InpaintRequest};
use crate::jobs::{JobKind, JobPayload};
use crate::storage::{is_inline_image, ImageStorage, StorageError};
use crate::upstream::{ImageGenerator, UpstreamError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ImageJobError {
    #[error("Failed to upload image: {0}")]
    UploadImage(StorageError),

    #[error("Failed to upload mask: {0}")]
    UploadMask(StorageError),

    #[error("Failed to inpaint image: {0}")]
    Inpaint(UpstreamError),

    #[error("Failed to generate image: {0}")]
    Generate(UpstreamError),
}

impl ImageJobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ImageJobError::Inpaint(UpstreamError::Cancelled)
                | ImageJobError::Generate(UpstreamError::Cancelled)
        )
    }
}

/// One unit of image work, usable either as a background job or inline.
#[derive(Debug, Clone)]
pub enum ImageTask {
    Inpaint(InpaintRequest),
    Generate(GenerateRequest),
}

impl ImageTask {
    pub fn kind(&self) -> JobKind {
        match self {
            ImageTask::Inpaint(_) => JobKind::Inpaint,
            ImageTask::Generate(_) => JobKind::Generate,
        }
    }

    /// The request as it is recorded on the job.
    pub fn payload(&self) -> JobPayload {
        let mut payload = JobPayload::new();
        match self {
            ImageTask::Inpaint(req) => {
                payload.insert("prompt".into(), req.prompt.clone().into());
                payload.insert("imageURL".into(), req.image_url.clone().into());
                payload.insert("mask".into(), req.mask.clone().into());
            }
            ImageTask::Generate(req) => {
                payload.insert("prompt".into(), req.prompt.clone().into());
            }
        }
        payload
    }
}

/// Runs image tasks against the generation API, uploading inline inputs
/// to storage first.
pub struct ImageService {
    generator: Arc<dyn ImageGenerator>,
    storage: Arc<dyn ImageStorage>,
}

impl ImageService {
    pub fn new(generator: Arc<dyn ImageGenerator>, storage: Arc<dyn ImageStorage>) -> Self {
        Self { generator, storage }
    }

    pub async fn execute(
        &self,
        owner: &str,
        task: &ImageTask,
        cancel: &CancellationToken,
    ) -> Result<Image, ImageJobError> {
        match task {
            ImageTask::Inpaint(req) => self.inpaint(owner, req, cancel).await,
            ImageTask::Generate(req) => self.generate(owner, req, cancel).await,
        }
    }

    pub async fn inpaint(
        &self,
        owner: &str,
        req: &InpaintRequest,
        cancel: &CancellationToken,
    ) -> Result<Image, ImageJobError> {
        let image_url = self
            .materialize(owner, &req.image_url, "")
            .await
            .map_err(ImageJobError::UploadImage)?;
        let mask_url = self
            .materialize(owner, &req.mask, "_mask")
            .await
            .map_err(ImageJobError::UploadMask)?;

        let url = self
            .generator
            .inpaint(&image_url, &mask_url, &req.prompt, cancel)
            .await
            .map_err(ImageJobError::Inpaint)?;

        info!("Inpainted image for user {}: {}", owner, url);
        Ok(Image::new(owner, url, &req.prompt, ImageKind::Inpainted))
    }

    pub async fn generate(
        &self,
        owner: &str,
        req: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Image, ImageJobError> {
        let url = self
            .generator
            .generate(&req.prompt, cancel)
            .await
            .map_err(ImageJobError::Generate)?;

        info!("Generated image for user {}: {}", owner, url);
        Ok(Image::new(owner, url, &req.prompt, ImageKind::Generated))
    }

    /// Inline images are uploaded to a temporary location so the
    /// generation API can fetch them; URLs pass through untouched.
    async fn materialize(&self, owner: &str, value: &str, suffix: &str) -> Result<String, StorageError> {
        if !is_inline_image(value) {
            return Ok(value.to_string());
        }
        let path = format!("temp/temp_{}_{}{}.png", owner, uuid::Uuid::new_v4(), suffix);
        debug!("Uploading inline image for user {} to {}", owner, path);
        self.storage.store_base64(value, &path).await
    }
}
