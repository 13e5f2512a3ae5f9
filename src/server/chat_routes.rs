//! Chat and avatar routes.

use crate::chat::{AvatarRequest, ChatError, CreateChatRequest, SendMessageRequest};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::error;

use super::session::Session;
use super::state::{GuardedChatService, ServerState};

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::NotFound | ChatError::AvatarNotFound => StatusCode::NOT_FOUND,
            ChatError::Forbidden | ChatError::AvatarForbidden(_) | ChatError::AvatarNotOwned => {
                StatusCode::FORBIDDEN
            }
            ChatError::NoAvatars | ChatError::InvalidAvatar(_) | ChatError::EmptyMessage => {
                StatusCode::BAD_REQUEST
            }
            ChatError::ChatWithoutAvatars => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::Upstream(e) if e.status() == Some(429) => StatusCode::TOO_MANY_REQUESTS,
            ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ChatError::Storage(e) => {
                error!("Chat storage failure: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn create_chat(
    session: Session,
    State(chat): State<GuardedChatService>,
    Json(body): Json<CreateChatRequest>,
) -> Result<Response, ChatError> {
    let conversation = chat.create_chat(&session.user_id, body).await?;
    Ok(Json(conversation).into_response())
}

async fn list_chats(
    session: Session,
    State(chat): State<GuardedChatService>,
) -> Result<Response, ChatError> {
    Ok(Json(chat.list_chats(&session.user_id)?).into_response())
}

async fn get_chat(
    session: Session,
    State(chat): State<GuardedChatService>,
    Path(chat_id): Path<String>,
) -> Result<Response, ChatError> {
    Ok(Json(chat.get_chat(&session.user_id, &chat_id)?).into_response())
}

async fn delete_chat(
    session: Session,
    State(chat): State<GuardedChatService>,
    Path(chat_id): Path<String>,
) -> Result<Response, ChatError> {
    chat.delete_chat(&session.user_id, &chat_id)?;
    Ok(Json(json!({ "message": "Chat deleted successfully" })).into_response())
}

async fn send_message(
    session: Session,
    State(chat): State<GuardedChatService>,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Response, ChatError> {
    let conversation = chat
        .send_message(&session.user_id, &chat_id, &body.message)
        .await?;
    Ok(Json(conversation).into_response())
}

/// Relays the model's reply as server-sent events. Errors raised before the
/// first byte come back as JSON; once streaming started the body just ends.
async fn send_message_stream(
    session: Session,
    State(chat): State<GuardedChatService>,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Response, ChatError> {
    let reply = chat
        .stream_reply(&session.user_id, &chat_id, &body.message)
        .await?;

    // The persister outlives the request; its handle is not needed here.
    drop(reply.persisted);

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(reply.body),
    )
        .into_response())
}

async fn create_avatar(
    session: Session,
    State(chat): State<GuardedChatService>,
    Json(body): Json<AvatarRequest>,
) -> Result<Response, ChatError> {
    let avatar = chat.create_avatar(&session.user_id, body)?;
    Ok((StatusCode::CREATED, Json(avatar)).into_response())
}

async fn list_avatars(
    session: Session,
    State(chat): State<GuardedChatService>,
) -> Result<Response, ChatError> {
    let avatars = chat.list_avatars(&session.user_id)?;
    Ok(Json(json!({ "avatars": avatars })).into_response())
}

async fn get_avatar(
    session: Session,
    State(chat): State<GuardedChatService>,
    Path(avatar_id): Path<String>,
) -> Result<Response, ChatError> {
    Ok(Json(chat.get_avatar(&session.user_id, &avatar_id)?).into_response())
}

async fn update_avatar(
    session: Session,
    State(chat): State<GuardedChatService>,
    Path(avatar_id): Path<String>,
    Json(body): Json<AvatarRequest>,
) -> Result<Response, ChatError> {
    Ok(Json(chat.update_avatar(&session.user_id, &avatar_id, body)?).into_response())
}

async fn delete_avatar(
    session: Session,
    State(chat): State<GuardedChatService>,
    Path(avatar_id): Path<String>,
) -> Result<Response, ChatError> {
    chat.delete_avatar(&session.user_id, &avatar_id)?;
    Ok(Json(json!({ "message": "Avatar deleted successfully" })).into_response())
}

pub fn make_chat_routes(state: ServerState) -> Router {
    Router::new()
        .route("/create", post(create_chat))
        .route("/list", get(list_chats))
        .route("/{chat_id}", get(get_chat).delete(delete_chat))
        .route("/{chat_id}/message", post(send_message))
        .route("/{chat_id}/message/stream", post(send_message_stream))
        .with_state(state)
}

pub fn make_avatar_routes(state: ServerState) -> Router {
    Router::new()
        .route("/", post(create_avatar).get(list_avatars))
        .route(
            "/{avatar_id}",
            get(get_avatar).put(update_avatar).delete(delete_avatar),
        )
        .with_state(state)
}
