//! Per-user image gallery: images copied into our own storage and kept
//! until their owner deletes them.

use super::models::{Image, ImageKind, SaveToGalleryRequest, UploadImageRequest};
use crate::persistence::{open_versioned, SqlType, Table, VersionedSchema};
use crate::sqlite_column;
use crate::storage::{ImageStorage, StorageError};
use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{info, warn};

pub trait GalleryStore: Send + Sync {
    fn get_image(&self, id: &str) -> Result<Option<Image>>;

    fn save_image(&self, image: &Image) -> Result<()>;

    /// Images owned by `owner`, newest first.
    fn list_images(&self, owner: &str) -> Result<Vec<Image>>;

    fn delete_image(&self, id: &str) -> Result<bool>;
}

const GALLERY_TABLE_V1: Table = Table {
    name: "gallery",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("url", SqlType::Text, non_null = true),
        sqlite_column!("prompt", SqlType::Text, non_null = true),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("storage_path", SqlType::Text, non_null = true),
        sqlite_column!("type", SqlType::Text, non_null = true),
    ],
    indices: &[("idx_gallery_user_created", "user_id, created_at DESC")],
};

const GALLERY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[GALLERY_TABLE_V1],
    migration: None,
}];

pub struct SqliteGalleryStore {
    conn: Arc<Mutex<Connection>>,
}

type ImageRow = (String, String, String, String, i64, String, String);

impl SqliteGalleryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), GALLERY_VERSIONED_SCHEMAS, "gallery")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<ImageRow> {
        Ok((
            row.get("id")?,
            row.get("user_id")?,
            row.get("url")?,
            row.get("prompt")?,
            row.get("created_at")?,
            row.get("storage_path")?,
            row.get("type")?,
        ))
    }

    fn to_image((id, owner, url, prompt, created_at, storage_path, kind): ImageRow) -> Result<Image> {
        let Some(kind) = ImageKind::parse(&kind) else {
            bail!("Unknown image type '{}' on gallery image {}", kind, id);
        };
        Ok(Image {
            id,
            owner,
            url,
            prompt,
            created_at,
            storage_path,
            kind,
        })
    }
}

impl GalleryStore for SqliteGalleryStore {
    fn get_image(&self, id: &str) -> Result<Option<Image>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT * FROM gallery WHERE id = ?1",
                params![id],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::to_image).transpose()
    }

    fn save_image(&self, image: &Image) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO gallery (id, user_id, url, prompt, created_at, storage_path, type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                image.id,
                image.owner,
                image.url,
                image.prompt,
                image.created_at,
                image.storage_path,
                image.kind.as_str(),
            ],
        )?;
        Ok(())
    }

    fn list_images(&self, owner: &str) -> Result<Vec<Image>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM gallery WHERE user_id = ?1 ORDER BY created_at DESC, id")?;
        let rows = stmt
            .query_map(params![owner], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::to_image).collect()
    }

    fn delete_image(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        Ok(conn.execute("DELETE FROM gallery WHERE id = ?1", params![id])? > 0)
    }
}

/// Volatile gallery, used when no database directory is configured.
#[derive(Default)]
pub struct InMemoryGalleryStore {
    images: RwLock<HashMap<String, Image>>,
}

impl InMemoryGalleryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GalleryStore for InMemoryGalleryStore {
    fn get_image(&self, id: &str) -> Result<Option<Image>> {
        let images = self.images.read().unwrap_or_else(|e| e.into_inner());
        Ok(images.get(id).cloned())
    }

    fn save_image(&self, image: &Image) -> Result<()> {
        let mut images = self.images.write().unwrap_or_else(|e| e.into_inner());
        images.insert(image.id.clone(), image.clone());
        Ok(())
    }

    fn list_images(&self, owner: &str) -> Result<Vec<Image>> {
        let images = self.images.read().unwrap_or_else(|e| e.into_inner());
        let mut owned: Vec<Image> = images.values().filter(|i| i.owner == owner).cloned().collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    fn delete_image(&self, id: &str) -> Result<bool> {
        let mut images = self.images.write().unwrap_or_else(|e| e.into_inner());
        Ok(images.remove(id).is_some())
    }
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("Image URL is required")]
    MissingImageUrl,

    #[error("Base64 image is required")]
    MissingImage,

    #[error("Image not found")]
    NotFound,

    #[error("You don't have permission to delete this image")]
    Forbidden,

    #[error("Failed to upload image to storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Gallery storage error: {0}")]
    Database(#[from] anyhow::Error),
}

pub struct GalleryService {
    store: Arc<dyn GalleryStore>,
    storage: Arc<dyn ImageStorage>,
}

impl GalleryService {
    pub fn new(store: Arc<dyn GalleryStore>, storage: Arc<dyn ImageStorage>) -> Self {
        Self { store, storage }
    }

    /// Copies the image at `req.image_url` into storage and records it.
    pub async fn save_from_url(&self, owner: &str, req: SaveToGalleryRequest) -> Result<Image, GalleryError> {
        if req.image_url.is_empty() {
            return Err(GalleryError::MissingImageUrl);
        }
        let path = gallery_path(owner);
        let url = self.storage.store_from_url(&req.image_url, &path).await?;
        self.record(owner, url, &req.prompt, req.kind, path).await
    }

    pub async fn upload(&self, owner: &str, req: UploadImageRequest) -> Result<Image, GalleryError> {
        if req.base64_image.is_empty() {
            return Err(GalleryError::MissingImage);
        }
        let path = gallery_path(owner);
        let url = self.storage.store_base64(&req.base64_image, &path).await?;
        self.record(owner, url, &req.prompt, ImageKind::Uploaded, path).await
    }

    pub fn list(&self, owner: &str) -> Result<Vec<Image>, GalleryError> {
        Ok(self.store.list_images(owner)?)
    }

    pub async fn delete(&self, owner: &str, image_id: &str) -> Result<(), GalleryError> {
        let image = self.store.get_image(image_id)?.ok_or(GalleryError::NotFound)?;
        if image.owner != owner {
            return Err(GalleryError::Forbidden);
        }
        if !self.store.delete_image(image_id)? {
            return Err(GalleryError::NotFound);
        }
        if let Err(e) = self.storage.remove(&image.storage_path).await {
            warn!("Gallery image {} deleted but its file stayed: {}", image_id, e);
        }
        info!("Deleted gallery image {} for user {}", image_id, owner);
        Ok(())
    }

    async fn record(
        &self,
        owner: &str,
        url: String,
        prompt: &str,
        kind: ImageKind,
        path: String,
    ) -> Result<Image, GalleryError> {
        let mut image = Image::new(owner, url, prompt, kind);
        image.storage_path = path;
        if let Err(e) = self.store.save_image(&image) {
            // No record points at the file any more.
            if let Err(cleanup) = self.storage.remove(&image.storage_path).await {
                warn!("Could not remove orphaned file {}: {}", image.storage_path, cleanup);
            }
            return Err(e.into());
        }
        info!("Saved {} image {} to gallery of {}", kind.as_str(), image.id, owner);
        Ok(image)
    }
}

fn gallery_path(owner: &str) -> String {
    format!("gallery/{}/{}.png", owner, uuid::Uuid::new_v4())
}
