//! Gallery routes under `/api/images`.

use crate::images::{GalleryError, Image, SaveToGalleryRequest, UploadImageRequest};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::session::Session;
use super::state::{GuardedGalleryService, ServerState};

#[derive(Serialize)]
struct ImageResponse {
    success: bool,
    image: Image,
}

#[derive(Serialize)]
struct GalleryResponse {
    success: bool,
    images: Vec<Image>,
}

impl IntoResponse for GalleryError {
    fn into_response(self) -> Response {
        let status = match &self {
            GalleryError::MissingImageUrl | GalleryError::MissingImage => StatusCode::BAD_REQUEST,
            GalleryError::NotFound => StatusCode::NOT_FOUND,
            GalleryError::Forbidden => StatusCode::FORBIDDEN,
            GalleryError::Storage(e) => {
                error!("Gallery upload failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GalleryError::Database(e) => {
                error!("Gallery storage failure: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

fn saved(image: Image) -> Response {
    Json(ImageResponse {
        success: true,
        image,
    })
    .into_response()
}

async fn save_to_gallery(
    session: Session,
    State(gallery): State<GuardedGalleryService>,
    Json(body): Json<SaveToGalleryRequest>,
) -> Result<Response, GalleryError> {
    Ok(saved(gallery.save_from_url(&session.user_id, body).await?))
}

async fn upload_image(
    session: Session,
    State(gallery): State<GuardedGalleryService>,
    Json(body): Json<UploadImageRequest>,
) -> Result<Response, GalleryError> {
    Ok(saved(gallery.upload(&session.user_id, body).await?))
}

async fn get_gallery(
    session: Session,
    State(gallery): State<GuardedGalleryService>,
) -> Result<Response, GalleryError> {
    let images = gallery.list(&session.user_id)?;
    Ok(Json(GalleryResponse {
        success: true,
        images,
    })
    .into_response())
}

async fn delete_image(
    session: Session,
    State(gallery): State<GuardedGalleryService>,
    Path(image_id): Path<String>,
) -> Result<Response, GalleryError> {
    gallery.delete(&session.user_id, &image_id).await?;
    Ok(Json(json!({ "success": true, "message": "Image deleted successfully" })).into_response())
}

pub fn make_gallery_routes(state: ServerState) -> Router {
    Router::new()
        .route("/gallery", post(save_to_gallery).get(get_gallery))
        .route("/gallery/{image_id}", delete(delete_image))
        .route("/upload", post(upload_image))
        .with_state(state)
}
