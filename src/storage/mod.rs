//! Object storage for generation inputs and gallery images.

use async_trait::async_trait;
use base64::Engine;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid base64 image format: {0}")]
    InvalidDataUri(&'static str),

    #[error("failed to decode base64 image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("failed to download image: {0}")]
    Download(#[from] reqwest::Error),

    #[error("failed to download image, status code: {0}")]
    DownloadStatus(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Decodes a base64 image (bare or as a `data:` URI), stores it under
    /// `path` and returns a URL the generation API can fetch it from.
    async fn store_base64(&self, data: &str, path: &str) -> Result<String, StorageError>;

    /// Downloads `source_url` and stores the bytes under `path`.
    async fn store_from_url(&self, source_url: &str, path: &str) -> Result<String, StorageError>;

    /// Removes whatever is stored under `path`. Missing files are not an error.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;
}

/// Returns true when `value` is an inline image that has to be uploaded
/// before the generation API can read it.
pub fn is_inline_image(value: &str) -> bool {
    value.len() > 100 && value.starts_with("data:image/")
}

/// Splits a `data:<type>;base64,<payload>` URI into content type and
/// decoded bytes. Input without the `data:` prefix is treated as bare base64.
pub fn decode_base64_image(data: &str) -> Result<(String, Vec<u8>), StorageError> {
    let (content_type, payload) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or(StorageError::InvalidDataUri("wrong number of parts"))?;
            let content_type = meta.split(';').next().unwrap_or_default();
            if content_type.is_empty() {
                return Err(StorageError::InvalidDataUri("missing content type"));
            }
            (content_type.to_string(), payload)
        }
        None => ("image/png".to_string(), data),
    };

    if payload.is_empty() {
        return Err(StorageError::InvalidDataUri("empty base64 data"));
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    Ok((content_type, bytes))
}

/// Stores images on the local filesystem. The server exposes `base_dir`
/// under `base_url`.
pub struct LocalImageStorage {
    base_dir: PathBuf,
    base_url: String,
    http: reqwest::Client,
}

impl LocalImageStorage {
    pub fn new(base_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || path.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(PathBuf, String), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok((target, format!("{}/{}", self.base_url, path)))
    }
}

#[async_trait]
impl ImageStorage for LocalImageStorage {
    async fn store_base64(&self, data: &str, path: &str) -> Result<String, StorageError> {
        self.resolve(path)?;
        let (content_type, bytes) = decode_base64_image(data)?;
        let (target, url) = self.write(path, &bytes).await?;

        info!(
            "Stored {} image at {:?} ({:#})",
            content_type,
            target,
            byte_unit::Byte::from(bytes.len())
        );
        Ok(url)
    }

    async fn store_from_url(&self, source_url: &str, path: &str) -> Result<String, StorageError> {
        self.resolve(path)?;
        debug!("Downloading {} to {}", source_url, path);
        let response = self.http.get(source_url).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::DownloadStatus(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;
        let (target, url) = self.write(path, &bytes).await?;

        info!(
            "Stored image from {} at {:?} ({:#})",
            source_url,
            target,
            byte_unit::Byte::from(bytes.len())
        );
        Ok(url)
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                info!("Removed stored image {:?}", target);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
