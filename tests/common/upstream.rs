//! In-process stand-in for the chat completion and image prediction APIs.
//!
//! Serves `/chat/completions` (plain JSON or SSE depending on the `stream`
//! flag) and the prediction endpoints the image client polls. Behaviour can
//! be switched per test through the public setters. `/files/{name}` serves
//! a one-pixel PNG for anything the server downloads.

use super::constants::*;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Default)]
struct Behaviour {
    stream_status: AtomicU16,
    predictions_hang: AtomicBool,
    chat_requests: AtomicUsize,
    predictions_created: AtomicUsize,
    predictions_cancelled: AtomicUsize,
}

#[derive(Clone)]
pub struct FakeUpstream {
    pub base_url: String,
    behaviour: Arc<Behaviour>,
    _shutdown_tx: Arc<tokio::sync::oneshot::Sender<()>>,
}

impl FakeUpstream {
    pub async fn spawn() -> Self {
        let behaviour = Arc::new(Behaviour::default());
        behaviour.stream_status.store(200, Ordering::SeqCst);

        let app = Router::new()
            .route("/chat/completions", post(chat_completions))
            .route("/v1/predictions", post(create_prediction))
            .route(
                "/v1/models/{owner}/{name}/predictions",
                post(create_model_prediction),
            )
            .route("/v1/predictions/{id}", get(get_prediction))
            .route("/v1/predictions/{id}/cancel", post(cancel_prediction))
            .route("/files/{name}", get(serve_file))
            .with_state(behaviour.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake upstream");
        let port = listener
            .local_addr()
            .expect("Failed to get fake upstream address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake upstream failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            behaviour,
            _shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Status returned to streamed completion requests. Anything but 200
    /// is answered with an error body.
    pub fn set_stream_status(&self, status: u16) {
        self.behaviour.stream_status.store(status, Ordering::SeqCst);
    }

    /// When set, predictions never leave the `processing` state.
    pub fn set_predictions_hang(&self, hang: bool) {
        self.behaviour.predictions_hang.store(hang, Ordering::SeqCst);
    }

    /// URL of a downloadable PNG on the fake upstream.
    pub fn file_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base_url, name)
    }

    pub fn chat_requests(&self) -> usize {
        self.behaviour.chat_requests.load(Ordering::SeqCst)
    }

    pub fn predictions_created(&self) -> usize {
        self.behaviour.predictions_created.load(Ordering::SeqCst)
    }

    pub fn predictions_cancelled(&self) -> usize {
        self.behaviour.predictions_cancelled.load(Ordering::SeqCst)
    }
}

fn sse_body() -> String {
    let mut body = String::new();
    for delta in FAKE_STREAM_DELTAS {
        let frame = json!({ "choices": [{ "delta": { "content": delta } }] });
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn chat_completions(State(behaviour): State<Arc<Behaviour>>, Json(body): Json<Value>) -> Response {
    behaviour.chat_requests.fetch_add(1, Ordering::SeqCst);
    let streamed = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if !streamed {
        return Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": FAKE_COMPLETION } }]
        }))
        .into_response();
    }

    let status = behaviour.stream_status.load(Ordering::SeqCst);
    if status != 200 {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "upstream exploded").into_response();
    }

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from(sse_body()),
    )
        .into_response()
}

fn prediction(id: &str, behaviour: &Behaviour) -> Value {
    if behaviour.predictions_hang.load(Ordering::SeqCst) {
        json!({ "id": id, "status": "processing" })
    } else {
        json!({ "id": id, "status": "succeeded", "output": [FAKE_IMAGE_URL] })
    }
}

async fn create_prediction(State(behaviour): State<Arc<Behaviour>>) -> Response {
    let n = behaviour.predictions_created.fetch_add(1, Ordering::SeqCst);
    let id = format!("pred-{}", n);
    (StatusCode::CREATED, Json(json!({ "id": id, "status": "starting" }))).into_response()
}

async fn create_model_prediction(
    State(behaviour): State<Arc<Behaviour>>,
    Path((_owner, _name)): Path<(String, String)>,
) -> Response {
    create_prediction(State(behaviour)).await
}

async fn get_prediction(State(behaviour): State<Arc<Behaviour>>, Path(id): Path<String>) -> Response {
    Json(prediction(&id, &behaviour)).into_response()
}

async fn cancel_prediction(State(behaviour): State<Arc<Behaviour>>, Path(id): Path<String>) -> Response {
    behaviour.predictions_cancelled.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": id, "status": "canceled" })).into_response()
}

async fn serve_file(Path(name): Path<String>) -> Response {
    if name.starts_with("missing") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let png = base64::engine::general_purpose::STANDARD
        .decode(PIXEL_PNG_BASE64)
        .expect("Invalid test PNG");
    ([(header::CONTENT_TYPE, "image/png")], png).into_response()
}
