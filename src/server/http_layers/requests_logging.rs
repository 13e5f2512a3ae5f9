//! Request logging middleware

use super::super::state::ServerState;
use crate::server::metrics::record_http_request;
use axum::extract::State;
use axum::{
    body::Body,
    http::{header, header::HeaderMap, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::time::Instant;
use tracing::{error, info};

#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

/// What body logging may do with a given message.
#[derive(Debug, PartialEq)]
enum BodyLog {
    Capture(usize),
    Skip(String),
}

fn body_log(headers: &HeaderMap) -> BodyLog {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with("text/event-stream") {
        return BodyLog::Skip("event stream, relayed unbuffered".to_string());
    }
    if content_type.starts_with("image/") {
        return BodyLog::Skip(format!("binary {}", content_type));
    }

    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    match size {
        None => BodyLog::Skip("no usable Content-length".to_string()),
        Some(size) if size >= MAX_LOGGABLE_BODY_LENGTH => BodyLog::Skip(format!(
            "too big to log ({:#})",
            byte_unit::Byte::from(size)
        )),
        Some(size) => BodyLog::Capture(size),
    }
}

/// Replaces inline `data:image/...` payloads with their length.
fn shorten_inline_images(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("data:image/") {
        out.push_str(&rest[..start]);
        let uri = &rest[start..];
        let end = uri.find('"').unwrap_or(uri.len());
        match uri[..end].split_once(',') {
            Some((meta, payload)) => {
                out.push_str(&format!("{},<{} chars>", meta, payload.len()));
            }
            None => out.push_str(&uri[..end]),
        }
        rest = &uri[end..];
    }
    out.push_str(rest);
    out
}

/// Buffers a small body, logs it and hands back an equivalent one.
async fn log_body(label: &str, headers: &HeaderMap, body: Body) -> Result<Body, axum::Error> {
    match body_log(headers) {
        BodyLog::Skip(reason) => {
            info!("  {} Body: {}", label, reason);
            Ok(body)
        }
        BodyLog::Capture(size) => {
            let bytes = axum::body::to_bytes(body, size).await?;
            info!(
                "  {} Body:\n{}",
                label,
                shorten_inline_images(&String::from_utf8_lossy(&bytes))
            );
            Ok(Body::from(bytes))
        }
    }
}

/// Collapses identifier segments so metric labels stay bounded.
fn path_label(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let looks_like_id = segment.len() >= 8 && segment.chars().any(|c| c.is_ascii_digit());
            if looks_like_id {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

pub async fn log_requests(
    State(state): State<ServerState>,
    mut request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let level = state.config.requests_logging_level.clone();
    let start = Instant::now();

    let method = request.method().to_string();
    let uri = request.uri().to_string();
    let path = request.uri().path().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, uri);
    }

    if level >= RequestsLoggingLevel::Headers {
        info!("  Req Headers:");
        for (name, value) in request.headers().iter() {
            if name == header::AUTHORIZATION || name == header::COOKIE {
                info!("    {:?}: <redacted>", name);
            } else {
                info!("    {:?}: {:?}", name, value);
            }
        }
    }

    if level >= RequestsLoggingLevel::Body {
        let (parts, body) = request.into_parts();
        match log_body("Req", &parts.headers, body).await {
            Ok(body) => request = Request::from_parts(parts, body),
            Err(err) => {
                error!("Failed to read request body: {:?}", err);
                return internal_error();
            }
        }
    }

    let mut response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        info!("  Resp Headers:");
        for (name, value) in response.headers().iter() {
            info!("    {:?}: {:?}", name, value);
        }
    }

    if level >= RequestsLoggingLevel::Body {
        let (parts, body) = response.into_parts();
        match log_body("Resp", &parts.headers, body).await {
            Ok(body) => response = Response::from_parts(parts, body),
            Err(err) => {
                error!("Failed to read response body: {:?}", err);
                return internal_error();
            }
        }
    }

    let status = response.status().as_u16();
    let duration = start.elapsed();

    if level > RequestsLoggingLevel::None {
        info!("<<< {} ({}ms)", status, duration.as_millis());
    }

    record_http_request(&method, &path_label(&path), status, duration);

    response
}
