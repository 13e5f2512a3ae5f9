use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Generated,
    Inpainted,
    Variation,
    Uploaded,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Generated => "generated",
            ImageKind::Inpainted => "inpainted",
            ImageKind::Variation => "variation",
            ImageKind::Uploaded => "uploaded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generated" => Some(ImageKind::Generated),
            "inpainted" => Some(ImageKind::Inpainted),
            "variation" => Some(ImageKind::Variation),
            "uploaded" => Some(ImageKind::Uploaded),
            _ => None,
        }
    }
}

/// An image produced by the generation API.
///
/// `url` points at wherever the generation API left the output. `storage_path`
/// is only set once the image has been copied into our own storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    #[serde(rename = "userId")]
    pub owner: String,
    pub url: String,
    pub prompt: String,
    pub created_at: i64,
    pub storage_path: String,
    #[serde(rename = "type")]
    pub kind: ImageKind,
}

impl Image {
    pub fn new(owner: &str, url: String, prompt: &str, kind: ImageKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            url,
            prompt: prompt.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            storage_path: String::new(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
}

/// Copies an image that lives elsewhere, typically a finished job result,
/// into the caller's gallery.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveToGalleryRequest {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(rename = "type", default = "default_saved_kind")]
    pub kind: ImageKind,
}

fn default_saved_kind() -> ImageKind {
    ImageKind::Generated
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageRequest {
    #[serde(default)]
    pub base64_image: String,
    #[serde(default)]
    pub prompt: String,
}

/// Body of an inpainting request. `image_url` and `mask` are either plain
/// URLs or `data:image/...;base64,` URIs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InpaintRequest {
    pub image_url: String,
    pub prompt: String,
    pub mask: String,
}
