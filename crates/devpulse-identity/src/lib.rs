//! devpulse-identity
//!
//! Resolves the canonical `workspace_id`/`device_id` strings on an inbound
//! [`Event`] to their server-minted identities, upserting as needed (spec
//! §4.A). This is the first step of event processing, ahead of persistence.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use devpulse_core::{DeviceId, Event, EventType, WorkspaceId};
use devpulse_error::{DevpulseError, ErrorCode};
use devpulse_store::Store;

/// The resolved identities for an event, ready for persistence.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// Server-minted workspace id.
    pub workspace_id: WorkspaceId,
    /// Client-supplied device id, upserted.
    pub device_id: DeviceId,
}

/// Resolve (and upsert as needed) the workspace and device for `event`,
/// then record the workspace↔device link at the event's working directory.
pub async fn resolve_identity(
    store: &Store,
    event: &Event,
) -> Result<ResolvedIdentity, DevpulseError> {
    let hint = extract_hints(event);
    let workspace_id = store
        .resolve_or_create_workspace(&event.workspace_id, hint.as_deref())
        .await
        .map_err(db_error)?;

    let device_id = DeviceId::new(event.device_id.clone());
    store
        .resolve_or_create_device(device_id.as_str())
        .await
        .map_err(db_error)?;

    let cwd = event
        .data
        .get("cwd")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    store
        .ensure_workspace_device_link(&workspace_id, &device_id, cwd)
        .await
        .map_err(db_error)?;

    Ok(ResolvedIdentity {
        workspace_id,
        device_id,
    })
}

/// `{default_branch}` only for `session.start` events whose
/// `data.git_branch` is a non-empty string (spec §4.C tie-breaks).
fn extract_hints(event: &Event) -> Option<String> {
    if !matches!(event.event_type(), EventType::SessionStart) {
        return None;
    }
    event
        .data
        .get("git_branch")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn db_error(e: sqlx::Error) -> DevpulseError {
    DevpulseError::new(ErrorCode::DatabaseUnavailable, e.to_string()).with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
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
    fn extract_hints_reads_git_branch_only_on_session_start() {
        let event = sample_event("session.start", json!({"git_branch": "main"}));
        assert_eq!(extract_hints(&event), Some("main".to_string()));

        let event = sample_event("session.end", json!({"git_branch": "main"}));
        assert_eq!(extract_hints(&event), None);
    }

    #[test]
    fn extract_hints_ignores_empty_branch() {
        let event = sample_event("session.start", json!({"git_branch": ""}));
        assert_eq!(extract_hints(&event), None);
    }

    #[test]
    fn extract_hints_handles_missing_field() {
        let event = sample_event("session.start", json!({}));
        assert_eq!(extract_hints(&event), None);
    }
}
