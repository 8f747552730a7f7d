//! devpulse-daemon
//!
//! Wires every devpulse crate into one running process (spec §4.I, §5):
//! the HTTP ingest and transcript-upload routes, the authenticated
//! WebSocket upgrade, the durable-log consumer loop, and the
//! post-processing pipeline's worker pool. `main.rs` owns process startup
//! and shutdown; this module owns [`AppState`], routing, and the route
//! handlers themselves so they can be exercised directly in tests.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod middleware;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use devpulse_core::Event;
use devpulse_error::{DevpulseError, ErrorCode};
use devpulse_eventlog::EventLog;
use devpulse_objectstore::{transcript_key, ObjectStore};
use devpulse_pipeline::PipelineHandle;
use devpulse_store::Store;
use devpulse_telemetry::{DependencyHealth, HealthReport, IngestCounters};
use devpulse_ws::WsState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Upload size ceiling (spec §4.I step 1).
const MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

/// Batch size bounds for `POST /api/events/ingest` (spec §4.I, §8).
const MIN_BATCH_LEN: usize = 1;
const MAX_BATCH_LEN: usize = 100;

/// Name under which a response echoes the pipeline-submission stream's
/// consumer group, also used by the log-consumer loop in `main.rs`.
pub const CONSUMER_GROUP: &str = "devpulse-processor";

/// Everything a route handler needs, shared behind an `Arc`.
pub struct AppState {
    /// Postgres persistence.
    pub store: Store,
    /// Durable append-only log, for the ingest route to append to.
    pub event_log: EventLog,
    /// Object store, for the transcript-upload route.
    pub objects: ObjectStore,
    /// Submission handle into the post-processing pipeline's worker pool.
    pub pipeline: PipelineHandle,
    /// Authenticated WebSocket state, also the broadcaster's owner.
    pub ws: WsState,
    /// Shared bearer token required on every non-health route.
    pub api_key: Arc<str>,
    /// Ingest-boundary counters.
    pub ingest_metrics: Arc<IngestCounters>,
}

/// Build the Axum router. Bearer auth gates everything except `/api/health`.
///
/// `/ws` needs [`WsState`] and the data routes need [`AppState`]; they are
/// built as separate sub-routers carrying each handler's own state type,
/// each independently wrapped in the same auth middleware, then merged.
pub fn build_app(state: Arc<AppState>) -> Router {
    let data_routes = Router::new()
        .route("/api/events/ingest", post(ingest_events))
        .route(
            "/api/sessions/{session_id}/transcript/upload",
            post(upload_transcript),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::require_bearer_auth,
        ))
        .with_state(Arc::clone(&state));

    let ws_routes = Router::new()
        .route("/ws", get(devpulse_ws::ws_upgrade))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::require_bearer_auth,
        ))
        .with_state(state.ws.clone());

    Router::new()
        .route("/api/health", get(health))
        .with_state(Arc::clone(&state))
        .merge(data_routes)
        .merge(ws_routes)
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let db = match state.store.ping().await {
        Ok(()) => DependencyHealth::ok("postgres"),
        Err(e) => DependencyHealth::unhealthy("postgres", e.to_string()),
    };
    let log = match state.event_log.ping().await {
        Ok(()) => DependencyHealth::ok("event_log"),
        Err(e) => DependencyHealth::unhealthy("event_log", e.to_string()),
    };
    let objects = match state.objects.ping().await {
        Ok(()) => DependencyHealth::ok("object_store"),
        Err(e) => DependencyHealth::unhealthy("object_store", e.to_string()),
    };

    let report = HealthReport::from_checks(vec![db, log, objects]);
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

// ---------------------------------------------------------------------------
// POST /api/events/ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IngestRequest {
    events: Vec<Event>,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    ingested: usize,
}

#[derive(Debug, Serialize)]
struct IndexedError {
    index: usize,
    error: String,
    code: String,
}

#[derive(Debug, Serialize)]
struct IngestRejection {
    errors: Vec<IndexedError>,
}

impl IntoResponse for IngestRejection {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

/// Either a 400 validation rejection or a transient-dependency failure
/// (5xx, per spec §4.I/§6 — a log-append failure must not look like a
/// rejected batch).
enum IngestError {
    Rejected(IngestRejection),
    Unavailable(DevpulseError),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected(r) => r.into_response(),
            Self::Unavailable(e) => e.into_response(),
        }
    }
}

/// Reject batches outside `[MIN_BATCH_LEN, MAX_BATCH_LEN]` before touching
/// the store or the log (spec §4.I, §8 property 8).
fn check_batch_len(len: usize) -> Result<(), IngestRejection> {
    if (MIN_BATCH_LEN..=MAX_BATCH_LEN).contains(&len) {
        return Ok(());
    }
    Err(IngestRejection {
        errors: vec![IndexedError {
            index: 0,
            error: format!(
                "events must contain between {MIN_BATCH_LEN} and {MAX_BATCH_LEN} entries, got {len}"
            ),
            code: "INVALID_ENVELOPE".to_string(),
        }],
    })
}

async fn ingest_events(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Response, IngestError> {
    if let Err(rejection) = check_batch_len(req.events.len()) {
        state.ingest_metrics.record_invalid();
        return Err(IngestError::Rejected(rejection));
    }

    let mut errors = Vec::new();
    for (index, event) in req.events.iter().enumerate() {
        if let Err(e) = devpulse_processor::validate_envelope(event)
            .and_then(|()| devpulse_processor::validate_payload(event))
        {
            errors.push(IndexedError {
                index,
                error: e.message.clone(),
                code: e.code.to_string(),
            });
        }
    }
    if !errors.is_empty() {
        state.ingest_metrics.record_invalid();
        return Err(IngestError::Rejected(IngestRejection { errors }));
    }

    for event in &req.events {
        state.event_log.append(event).await.map_err(|e| {
            IngestError::Unavailable(
                DevpulseError::new(ErrorCode::EventLogUnavailable, e.to_string()).with_source(e),
            )
        })?;
    }
    state.ingest_metrics.record_received();

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            ingested: req.events.len(),
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /api/sessions/:id/transcript/upload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct UploadResponse {
    status: &'static str,
    s3_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline_triggered: Option<bool>,
}

async fn upload_transcript(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, DevpulseError> {
    let content_length = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    match content_length {
        None | Some(0) => {
            return Err(DevpulseError::new(
                ErrorCode::MissingContentLength,
                "Content-Length header is required and must be non-zero",
            ));
        }
        Some(len) if len > MAX_UPLOAD_BYTES => {
            return Err(DevpulseError::new(
                ErrorCode::PayloadTooLarge,
                format!("upload of {len} bytes exceeds the {MAX_UPLOAD_BYTES} byte limit"),
            ));
        }
        _ => {}
    }

    let session = store_error(state.store.get_session(&session_id).await)?
        .ok_or_else(|| DevpulseError::new(ErrorCode::NotFound, "unknown session"))?;

    if let Some(existing_key) = session.transcript_s3_key.clone() {
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "already_uploaded", "s3_key": existing_key })),
        )
            .into_response());
    }

    let workspace = store_error(state.store.get_workspace(&session.workspace_id).await)?
        .ok_or_else(|| DevpulseError::new(ErrorCode::NotFound, "session's workspace not found"))?;

    let key = transcript_key(&workspace.canonical_id, &session_id);

    state
        .objects
        .put(&key, body.to_vec(), "application/x-ndjson")
        .await
        .map_err(|e| DevpulseError::new(ErrorCode::ObjectStoreUnavailable, e.to_string()).with_source(e))?;

    let lifecycle = store_error(state.store.set_transcript_key(&session_id, &key).await)?;

    let pipeline_triggered = matches!(lifecycle, Some(devpulse_core::Lifecycle::Ended));
    if pipeline_triggered {
        state.pipeline.enqueue_session(session_id.clone());
    }
    state.ingest_metrics.record_upload_received();

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            status: "uploaded",
            s3_key: key,
            pipeline_triggered: Some(pipeline_triggered),
        }),
    )
        .into_response())
}

fn store_error<T>(r: Result<T, sqlx::Error>) -> Result<T, DevpulseError> {
    r.map_err(|e| DevpulseError::new(ErrorCode::DatabaseUnavailable, e.to_string()).with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn check_batch_len_accepts_the_full_range() {
        assert!(check_batch_len(MIN_BATCH_LEN).is_ok());
        assert!(check_batch_len(MAX_BATCH_LEN).is_ok());
        assert!(check_batch_len(50).is_ok());
    }

    #[test]
    fn check_batch_len_rejects_empty_and_oversized_batches() {
        assert!(check_batch_len(0).is_err());
        assert!(check_batch_len(MAX_BATCH_LEN + 1).is_err());
    }

    #[tokio::test]
    async fn rejected_ingest_renders_400() {
        let rejection = check_batch_len(0).unwrap_err();
        let resp = IngestError::Rejected(rejection).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unavailable_ingest_renders_the_underlying_error_code() {
        let err = DevpulseError::new(ErrorCode::EventLogUnavailable, "redis down");
        let resp = IngestError::Unavailable(err).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "EventLogUnavailable");
    }
}
