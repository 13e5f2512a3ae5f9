//! Image job routes: asynchronous jobs with status polling, plus the inline
//! variants bounded by the sync timeout.

use crate::images::{GenerateRequest, Image, ImageTask, InpaintRequest};
use crate::jobs::{JobRecord, JobStoreError, SyncImageError};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::session::Session;
use super::state::{GuardedJobRunner, ServerState};

#[derive(Serialize)]
struct JobResponse {
    success: bool,
    job: JobRecord,
}

#[derive(Serialize)]
struct ImageResponse {
    success: bool,
    image: Image,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

fn accepted(job: JobRecord) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(JobResponse { success: true, job }),
    )
        .into_response()
}

async fn create_inpaint_job(
    session: Session,
    State(runner): State<GuardedJobRunner>,
    Json(body): Json<InpaintRequest>,
) -> Response {
    accepted(runner.submit(&session.user_id, ImageTask::Inpaint(body)))
}

async fn create_generate_job(
    session: Session,
    State(runner): State<GuardedJobRunner>,
    Json(body): Json<GenerateRequest>,
) -> Response {
    accepted(runner.submit(&session.user_id, ImageTask::Generate(body)))
}

async fn get_job(
    session: Session,
    State(runner): State<GuardedJobRunner>,
    Path(job_id): Path<String>,
) -> Response {
    match runner.store().get(&job_id) {
        Ok(job) if job.owner != session.user_id => {
            debug!("User {} asked for job {} of another user", session.user_id, job_id);
            failure(StatusCode::FORBIDDEN, "Forbidden")
        }
        Ok(job) => Json(JobResponse { success: true, job }).into_response(),
        Err(JobStoreError::NotFound(_)) => failure(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn run_inline(runner: &GuardedJobRunner, owner: &str, task: ImageTask) -> Response {
    match runner.run_with_timeout(owner, task).await {
        Ok(image) => Json(ImageResponse {
            success: true,
            image,
        })
        .into_response(),
        Err(e @ SyncImageError::Timeout(_)) => failure(StatusCode::GATEWAY_TIMEOUT, e.to_string()),
        Err(e) => {
            warn!("Inline image request failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn inpaint_now(
    session: Session,
    State(runner): State<GuardedJobRunner>,
    Json(body): Json<InpaintRequest>,
) -> Response {
    run_inline(&runner, &session.user_id, ImageTask::Inpaint(body)).await
}

async fn generate_now(
    session: Session,
    State(runner): State<GuardedJobRunner>,
    Json(body): Json<GenerateRequest>,
) -> Response {
    run_inline(&runner, &session.user_id, ImageTask::Generate(body)).await
}

pub fn make_job_routes(state: ServerState) -> Router {
    Router::new()
        .route("/jobs/inpaint", post(create_inpaint_job))
        .route("/jobs/generate", post(create_generate_job))
        .route("/jobs/{job_id}", get(get_job))
        .route("/inpaint", post(inpaint_now))
        .route("/generate", post(generate_now))
        .with_state(state)
}
