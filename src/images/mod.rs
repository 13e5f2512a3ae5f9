mod gallery;
mod models;
mod service;

pub use gallery::{
    GalleryError, GalleryService, GalleryStore, InMemoryGalleryStore, SqliteGalleryStore,
};
pub use models::{
    GenerateRequest, Image, ImageKind, InpaintRequest, SaveToGalleryRequest, UploadImageRequest,
};
pub use service::{ImageJobError, ImageService, ImageTask};

#[cfg(test)]
pub(crate) use service::testing;
