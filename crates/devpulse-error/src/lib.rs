//! Unified error taxonomy with stable error codes for devpulse.
//!
//! Every [`DevpulseError`] carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain,
//! and arbitrary key-value context. The categories mirror spec §7's
//! observable error kinds — they are not Rust types, they're a
//! classification operators and callers can branch on.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

/// Broad family an [`ErrorCode`] belongs to, matching spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed envelope or payload (never enters the log).
    Validation,
    /// Missing or incorrect bearer token.
    Auth,
    /// Unknown session, workspace, or other resource.
    NotFound,
    /// Duplicate event id or duplicate transcript upload.
    Conflict,
    /// Database, log, or object store unavailable.
    TransientDependency,
    /// A registered handler failed; the event row still persists.
    Handler,
    /// Pipeline fetch/parse/persist/summary step failed.
    PipelineStep,
    /// The pipeline queue was full and the submission was dropped.
    Backpressure,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::TransientDependency => "transient_dependency",
            Self::Handler => "handler",
            Self::PipelineStep => "pipeline_step",
            Self::Backpressure => "backpressure",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Machine-readable, stable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Envelope failed the grammar/shape checks in spec §4.C step 1.
    InvalidEnvelope,
    /// A registered event type's payload failed its schema.
    InvalidPayload,
    /// Bearer token missing or incorrect.
    Unauthorized,
    /// Requested resource does not exist.
    NotFound,
    /// Duplicate event id observed on insert.
    DuplicateEvent,
    /// Transcript already uploaded for this session.
    AlreadyUploaded,
    /// Upload exceeded the 200 MiB limit.
    PayloadTooLarge,
    /// `Content-Length` was missing or zero.
    MissingContentLength,
    /// An optimistic lifecycle transition lost the race or was invalid.
    InvalidTransition,
    /// Durable log append/read/ack failed.
    EventLogUnavailable,
    /// Postgres is unreachable or a query failed unexpectedly.
    DatabaseUnavailable,
    /// The object store is unreachable.
    ObjectStoreUnavailable,
    /// The summary-generation collaborator failed or timed out.
    SummaryUnavailable,
    /// A registered handler raised an error after the event row was inserted.
    HandlerFailed,
    /// A pipeline step (fetch/parse/persist/summarize) failed.
    PipelineStepFailed,
    /// The bounded pipeline queue was full.
    QueueFull,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// The broad category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidEnvelope | Self::InvalidPayload => ErrorCategory::Validation,
            Self::Unauthorized => ErrorCategory::Auth,
            Self::NotFound => ErrorCategory::NotFound,
            Self::DuplicateEvent | Self::AlreadyUploaded => ErrorCategory::Conflict,
            Self::PayloadTooLarge | Self::MissingContentLength => ErrorCategory::Validation,
            Self::InvalidTransition => ErrorCategory::Conflict,
            Self::EventLogUnavailable
            | Self::DatabaseUnavailable
            | Self::ObjectStoreUnavailable
            | Self::SummaryUnavailable => ErrorCategory::TransientDependency,
            Self::HandlerFailed => ErrorCategory::Handler,
            Self::PipelineStepFailed => ErrorCategory::PipelineStep,
            Self::QueueFull => ErrorCategory::Backpressure,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// The HTTP status this code maps to at the ingest/upload boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEnvelope | Self::InvalidPayload | Self::MissingContentLength => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::DuplicateEvent | Self::AlreadyUploaded | Self::InvalidTransition => {
                StatusCode::OK
            }
            Self::EventLogUnavailable
            | Self::DatabaseUnavailable
            | Self::ObjectStoreUnavailable
            | Self::SummaryUnavailable
            | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HandlerFailed | Self::PipelineStepFailed | Self::QueueFull => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Unified devpulse error.
pub struct DevpulseError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl DevpulseError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context. Silently skipped
    /// if serialization fails.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for DevpulseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevpulseError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Display for DevpulseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for DevpulseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl IntoResponse for DevpulseError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code.to_string(),
        }));
        (self.code.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_maps_duplicate_event_to_conflict() {
        assert_eq!(ErrorCode::DuplicateEvent.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn payload_too_large_maps_to_413_not_400() {
        assert_eq!(
            ErrorCode::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn context_round_trips_through_serde_json() {
        let err = DevpulseError::new(ErrorCode::Internal, "boom").with_context("n", 42);
        assert_eq!(err.context["n"], json!(42));
    }
}
