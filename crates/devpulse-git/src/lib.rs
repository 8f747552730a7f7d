//! devpulse-git
//!
//! The git correlator and the `git.{commit,push,checkout,merge}` event
//! handlers (spec §4.E). Correlation and persistence are a single unit:
//! `devpulse_store::Store::insert_git_activity` writes the activity row and
//! backfills the originating event's `session_id` in one transaction.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use devpulse_core::{Correlation, DeviceId, Event, EventType, GitActivityType, WorkspaceId};
use devpulse_error::{DevpulseError, ErrorCode};
use devpulse_store::{GitActivityRow, Store};

/// Handle a registered `git.*` event: correlate it to the active session (if
/// any) and persist the activity row. Returns the correlation result so
/// callers can log or assert on it.
pub async fn handle_git_event(
    store: &Store,
    event: &Event,
    workspace_id: &WorkspaceId,
    device_id: &DeviceId,
) -> Result<Correlation, DevpulseError> {
    let activity_type = activity_type_for(event.event_type())
        .ok_or_else(|| DevpulseError::new(ErrorCode::Internal, "not a registered git event"))?;

    let correlation = store
        .correlate_session(workspace_id, device_id, event.timestamp)
        .await
        .map_err(db_error)?;

    let branch = branch_for(activity_type, event)?;

    let row = GitActivityRow {
        id: event.id.to_string(),
        workspace_id: *workspace_id,
        device_id: device_id.clone(),
        session_id: correlation.session_id.clone(),
        activity_type,
        branch,
        commit_sha: opt_str(event, "commit_sha"),
        message: opt_str(event, "message"),
        insertions: opt_i64(event, "insertions"),
        deletions: opt_i64(event, "deletions"),
        files_changed: opt_i64(event, "files_changed"),
        timestamp: event.timestamp,
        data: event.data.clone(),
    };

    store.insert_git_activity(&row).await.map_err(db_error)?;

    Ok(correlation)
}

fn activity_type_for(event_type: EventType) -> Option<GitActivityType> {
    match event_type {
        EventType::GitCommit => Some(GitActivityType::Commit),
        EventType::GitPush => Some(GitActivityType::Push),
        EventType::GitCheckout => Some(GitActivityType::Checkout),
        EventType::GitMerge => Some(GitActivityType::Merge),
        _ => None,
    }
}

/// For `checkout`, `branch` is `to_branch` if non-null, else `to_ref`
/// (detached head); every other git type reads `branch` directly.
fn branch_for(activity_type: GitActivityType, event: &Event) -> Result<String, DevpulseError> {
    let branch = if activity_type == GitActivityType::Checkout {
        opt_str(event, "to_branch").or_else(|| opt_str(event, "to_ref"))
    } else {
        opt_str(event, "branch")
    };

    branch.ok_or_else(|| {
        DevpulseError::new(
            ErrorCode::InvalidPayload,
            format!("{} requires a branch reference", event.event_type),
        )
    })
}

fn opt_str(event: &Event, field: &str) -> Option<String> {
    event
        .data
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn opt_i64(event: &Event, field: &str) -> Option<i64> {
    event.data.get(field).and_then(|v| v.as_i64())
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
    fn checkout_prefers_to_branch_over_to_ref() {
        let event = sample_event(
            "git.checkout",
            json!({"to_branch": "main", "to_ref": "deadbeef"}),
        );
        assert_eq!(
            branch_for(GitActivityType::Checkout, &event).unwrap(),
            "main"
        );
    }

    #[test]
    fn checkout_falls_back_to_to_ref_on_detached_head() {
        let event = sample_event("git.checkout", json!({"to_ref": "deadbeef"}));
        assert_eq!(
            branch_for(GitActivityType::Checkout, &event).unwrap(),
            "deadbeef"
        );
    }

    #[test]
    fn commit_requires_branch() {
        let event = sample_event("git.commit", json!({}));
        assert!(branch_for(GitActivityType::Commit, &event).is_err());
    }
}
