//! HTTP middleware for the devpulse daemon: request ids, structured access
//! logging, and the bearer-token gate on non-health routes (spec §6, §7).

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use ulid::Ulid;

use crate::AppState;

/// A unique request identifier, available as an Axum extension and echoed
/// back on the `x-request-id` response header.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Ulid);

/// Stamp every request with a [`RequestId`] and echo it back.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Ulid::new());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

/// Log method, path, status, and duration for every request.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    resp
}

/// Require `Authorization: Bearer <api_key>` matching the configured shared
/// token. `/api/health` is mounted outside this layer and never reaches it.
pub async fn require_bearer_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented != Some(&*state.api_key) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing or invalid bearer token", "code": "UNAUTHORIZED" })),
        )
            .into_response();
    }

    next.run(req).await
}
