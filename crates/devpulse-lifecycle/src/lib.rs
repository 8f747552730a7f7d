//! devpulse-lifecycle
//!
//! The session lifecycle DAG (spec §4.D) and the `session.{start,end,compact}`
//! handlers that drive it. Transitions themselves are optimistic conditional
//! updates executed by `devpulse_store::Store`; this crate owns the
//! allowed-from sets and the payload shape checks that gate them.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use devpulse_core::{DeviceId, Event, Lifecycle};
use devpulse_error::{DevpulseError, ErrorCode};
use devpulse_store::Store;

/// States from which `session.end` may legally fire.
pub const ENDABLE_FROM: &[Lifecycle] = &[Lifecycle::Detected, Lifecycle::Capturing];

/// States from which the pipeline may transition a session to `parsed`.
pub const PARSABLE_FROM: &[Lifecycle] = &[Lifecycle::Ended];

/// States from which the pipeline may transition a session to `summarized`.
pub const SUMMARIZABLE_FROM: &[Lifecycle] = &[Lifecycle::Parsed];

/// States from which an operator may archive a session.
pub const ARCHIVABLE_FROM: &[Lifecycle] = &[
    Lifecycle::Detected,
    Lifecycle::Capturing,
    Lifecycle::Ended,
    Lifecycle::Parsed,
    Lifecycle::Summarized,
];

/// Outcome of the `session.start` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new `detected` row was created.
    Created,
    /// A row for this id already existed; the start event's fields stay
    /// authoritative from first observation and are not overwritten.
    AlreadyStarted,
}

/// Outcome of the `session.end` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOutcome {
    /// Whether the conditional transition to `ended` took effect.
    pub transitioned: bool,
    /// Whether the caller should trigger the post-processing pipeline for
    /// this session (the transcript key was already set when we ended).
    pub trigger_pipeline: bool,
}

/// Handle a `session.start` event: insert a `detected` row keyed by the
/// payload's `cc_session_id`. No transition out of a further state is ever
/// attempted here — a pre-existing row is left untouched (spec §4.D).
pub async fn handle_session_start(
    store: &Store,
    event: &Event,
    workspace_id: &devpulse_core::WorkspaceId,
    device_id: &DeviceId,
) -> Result<StartOutcome, DevpulseError> {
    let cc_session_id = require_str(event, "cc_session_id")?;
    let cwd = event
        .data
        .get("cwd")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let git_branch = opt_str(event, "git_branch");
    let git_remote = opt_str(event, "git_remote");
    let model = opt_str(event, "model");

    let created = store
        .insert_session_start(
            cc_session_id,
            workspace_id,
            device_id,
            cwd,
            git_branch,
            git_remote,
            model,
            event.timestamp,
        )
        .await
        .map_err(db_error)?;

    Ok(if created {
        StartOutcome::Created
    } else {
        StartOutcome::AlreadyStarted
    })
}

/// Handle a `session.end` event (spec §4.D):
///
/// 1. Non-positive `duration_ms` is backfilled from `started_at` and the
///    event timestamp (tolerance for hook scripts that can't compute it).
/// 2. Attempt the conditional transition to `ended`. Zero rows affected is a
///    losing race or an invalid transition; the caller only warns.
/// 3. If the session's `transcript_s3_key` was already set, the caller
///    should trigger the pipeline; otherwise the upload route will.
pub async fn handle_session_end(store: &Store, event: &Event) -> Result<EndOutcome, DevpulseError> {
    let cc_session_id = require_str(event, "cc_session_id")?;
    let end_reason = event
        .data
        .get("end_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("other");

    let duration_ms = match event.data.get("duration_ms").and_then(|v| v.as_i64()) {
        Some(ms) if ms > 0 => ms,
        _ => backfill_duration(store, cc_session_id, event.timestamp).await?,
    };

    let transitioned = store
        .transition_to_ended(
            cc_session_id,
            ENDABLE_FROM,
            event.timestamp,
            end_reason,
            duration_ms,
        )
        .await
        .map_err(db_error)?;

    if !transitioned {
        tracing::warn!(session_id = cc_session_id, "session.end: no eligible row (losing race or already ended)");
        return Ok(EndOutcome {
            transitioned: false,
            trigger_pipeline: false,
        });
    }

    let session = store.get_session(cc_session_id).await.map_err(db_error)?;
    let trigger_pipeline = session
        .map(|s| s.transcript_s3_key.is_some())
        .unwrap_or(false);

    Ok(EndOutcome {
        transitioned: true,
        trigger_pipeline,
    })
}

/// Handle a `session.compact` event: record the compaction sequence
/// watermark. Per spec §9, compaction never changes `lifecycle`; lower
/// sequence values than already recorded are refused silently.
pub async fn handle_session_compact(store: &Store, event: &Event) -> Result<bool, DevpulseError> {
    let cc_session_id = require_str(event, "cc_session_id")?;
    let sequence = event
        .data
        .get("sequence")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| {
            DevpulseError::new(ErrorCode::InvalidPayload, "session.compact requires data.sequence")
        })?;

    let advanced = store
        .bump_compact_sequence(cc_session_id, sequence)
        .await
        .map_err(db_error)?;

    if !advanced {
        tracing::debug!(
            session_id = cc_session_id,
            sequence,
            "session.compact: sequence did not advance the watermark"
        );
    }
    Ok(advanced)
}

async fn backfill_duration(
    store: &Store,
    session_id: &str,
    ended_at: DateTime<Utc>,
) -> Result<i64, DevpulseError> {
    let session = store.get_session(session_id).await.map_err(db_error)?;
    let started_at = session.map(|s| s.started_at);
    Ok(match started_at {
        Some(started_at) => (ended_at - started_at).num_milliseconds().max(0),
        None => 0,
    })
}

fn require_str<'a>(event: &'a Event, field: &str) -> Result<&'a str, DevpulseError> {
    event
        .data
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            DevpulseError::new(
                ErrorCode::InvalidPayload,
                format!("{} requires a non-empty data.{field}", event.event_type),
            )
        })
}

fn opt_str<'a>(event: &'a Event, field: &str) -> Option<&'a str> {
    event.data.get(field).and_then(|v| v.as_str())
}

fn db_error(e: sqlx::Error) -> DevpulseError {
    DevpulseError::new(ErrorCode::DatabaseUnavailable, e.to_string()).with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use devpulse_core::EventId;
    use serde_json::json;

    fn sample_event(event_type: &str, data: serde_json::Value) -> Event {
        Event {
            id: EventId::new(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            device_id: "D1".to_string(),
            workspace_id: "github.com/o/r".to_string(),
            session_id: None,
            data,
            blob_refs: vec![],
            ingested_at: None,
        }
    }

    #[test]
    fn require_str_rejects_missing_and_empty() {
        let event = sample_event("session.start", json!({"cc_session_id": ""}));
        assert!(require_str(&event, "cc_session_id").is_err());

        let event = sample_event("session.start", json!({}));
        assert!(require_str(&event, "cc_session_id").is_err());
    }

    #[test]
    fn require_str_accepts_non_empty() {
        let event = sample_event("session.start", json!({"cc_session_id": "S1"}));
        assert_eq!(require_str(&event, "cc_session_id").unwrap(), "S1");
    }

    #[test]
    fn endable_from_excludes_terminal_states() {
        assert!(!ENDABLE_FROM.contains(&Lifecycle::Ended));
        assert!(!ENDABLE_FROM.contains(&Lifecycle::Archived));
    }

    #[test]
    fn archivable_from_excludes_failed_and_archived_itself() {
        assert!(!ARCHIVABLE_FROM.contains(&Lifecycle::Failed));
        assert!(!ARCHIVABLE_FROM.contains(&Lifecycle::Archived));
    }
}
