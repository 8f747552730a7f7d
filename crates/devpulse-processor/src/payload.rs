//! Payload validation registry keyed by event type (spec §4.C step 2).
//! Unregistered types pass through untouched; the seven registered types
//! each enforce the shape their handler (`devpulse-lifecycle`,
//! `devpulse-git`) depends on. This is a cheap pre-filter — the handlers
//! re-check the same fields defensively, so a bug here fails closed rather
//! than corrupting state.

use devpulse_core::{Event, EventType};
use devpulse_error::{DevpulseError, ErrorCode};

/// Validate `event.data` against the registered schema for its type.
/// Unregistered types always pass.
pub fn validate_payload(event: &Event) -> Result<(), DevpulseError> {
    match event.event_type() {
        EventType::SessionStart | EventType::SessionEnd => require_str(event, "cc_session_id"),
        EventType::SessionCompact => {
            require_str(event, "cc_session_id")?;
            require_i64(event, "sequence")
        }
        EventType::GitCommit | EventType::GitPush | EventType::GitMerge => {
            require_str(event, "branch")
        }
        EventType::GitCheckout => {
            if event.data.get("to_branch").and_then(|v| v.as_str()).is_some()
                || event.data.get("to_ref").and_then(|v| v.as_str()).is_some()
            {
                Ok(())
            } else {
                Err(DevpulseError::new(
                    ErrorCode::InvalidPayload,
                    "git.checkout requires data.to_branch or data.to_ref",
                ))
            }
        }
        _ => Ok(()),
    }
}

fn require_str(event: &Event, field: &str) -> Result<(), DevpulseError> {
    let present = event
        .data
        .get(field)
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.is_empty());
    if present {
        Ok(())
    } else {
        Err(DevpulseError::new(
            ErrorCode::InvalidPayload,
            format!("{} requires a non-empty data.{field}", event.event_type),
        ))
    }
}

fn require_i64(event: &Event, field: &str) -> Result<(), DevpulseError> {
    if event.data.get(field).and_then(|v| v.as_i64()).is_some() {
        Ok(())
    } else {
        Err(DevpulseError::new(
            ErrorCode::InvalidPayload,
            format!("{} requires an integer data.{field}", event.event_type),
        ))
    }
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
    fn unregistered_type_always_passes() {
        let event = sample_event("system.heartbeat", json!({}));
        assert!(validate_payload(&event).is_ok());
    }

    #[test]
    fn session_start_requires_cc_session_id() {
        let event = sample_event("session.start", json!({}));
        assert!(validate_payload(&event).is_err());

        let event = sample_event("session.start", json!({"cc_session_id": "S1"}));
        assert!(validate_payload(&event).is_ok());
    }

    #[test]
    fn session_compact_requires_sequence_as_integer() {
        let event = sample_event(
            "session.compact",
            json!({"cc_session_id": "S1", "sequence": "not a number"}),
        );
        assert!(validate_payload(&event).is_err());

        let event = sample_event(
            "session.compact",
            json!({"cc_session_id": "S1", "sequence": 3}),
        );
        assert!(validate_payload(&event).is_ok());
    }

    #[test]
    fn git_checkout_accepts_either_to_branch_or_to_ref() {
        let event = sample_event("git.checkout", json!({"to_ref": "deadbeef"}));
        assert!(validate_payload(&event).is_ok());

        let event = sample_event("git.checkout", json!({}));
        assert!(validate_payload(&event).is_err());
    }
}
