use super::state::ServerState;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tracing::debug;

/// The authenticated principal of a request.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
}

pub const COOKIE_SESSION_TOKEN_KEY: &str = "session_token";
pub const HEADER_SESSION_TOKEN_KEY: &str = "Authorization";

pub enum SessionExtractionError {
    MissingToken,
    AccessDenied,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> Response {
        let message = match self {
            SessionExtractionError::MissingToken => "unauthorized",
            SessionExtractionError::AccessDenied => "invalid token",
        };
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
    }
}

fn extract_session_token_from_cookies(parts: &Parts) -> Option<String> {
    CookieJar::from_headers(&parts.headers)
        .get(COOKIE_SESSION_TOKEN_KEY)
        .map(|cookie| cookie.value().to_string())
}

fn extract_session_token_from_headers(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(HEADER_SESSION_TOKEN_KEY)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn extract_session(parts: &Parts, ctx: &ServerState) -> Result<Session, SessionExtractionError> {
    let token = extract_session_token_from_headers(parts)
        .or_else(|| extract_session_token_from_cookies(parts))
        .ok_or_else(|| {
            debug!("No token in headers nor cookies.");
            SessionExtractionError::MissingToken
        })?;

    match ctx.resolver.resolve(&token) {
        Some(user_id) => Ok(Session { user_id }),
        None => {
            debug!("Token did not resolve to a user");
            Err(SessionExtractionError::AccessDenied)
        }
    }
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        extract_session(parts, ctx)
    }
}
