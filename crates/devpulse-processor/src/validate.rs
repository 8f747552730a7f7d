//! Envelope validation (spec §4.C step 1). By the time an [`Event`] reaches
//! this crate it has already round-tripped through `serde_json`, which
//! enforces some of the grammar (ULID shape via `EventId`, ISO-8601
//! timestamps via `chrono`) but not all of it — `data` deserializes as any
//! `serde_json::Value`, so the map-shape check still has to happen here.

use devpulse_core::Event;
use devpulse_error::{DevpulseError, ErrorCode};

/// Validate the envelope-level shape of `event`.
pub fn validate_envelope(event: &Event) -> Result<(), DevpulseError> {
    if event.device_id.trim().is_empty() {
        return Err(DevpulseError::new(
            ErrorCode::InvalidEnvelope,
            "device_id must be a non-empty string",
        ));
    }
    if event.workspace_id.trim().is_empty() {
        return Err(DevpulseError::new(
            ErrorCode::InvalidEnvelope,
            "workspace_id must be a non-empty string",
        ));
    }
    if !event.data.is_object() {
        return Err(DevpulseError::new(ErrorCode::InvalidEnvelope, "data must be a map"));
    }
    for (index, blob_ref) in event.blob_refs.iter().enumerate() {
        if blob_ref.key.trim().is_empty() {
            return Err(DevpulseError::new(
                ErrorCode::InvalidEnvelope,
                format!("blob_refs[{index}].key must be a non-empty string"),
            )
            .with_context("index", index));
        }
        if blob_ref.content_type.trim().is_empty() {
            return Err(DevpulseError::new(
                ErrorCode::InvalidEnvelope,
                format!("blob_refs[{index}].content_type must be a non-empty string"),
            )
            .with_context("index", index));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use devpulse_core::{BlobRef, EventId};
    use serde_json::json;

    fn sample_event() -> Event {
        Event {
            id: EventId::new(),
            event_type: "session.start".to_string(),
            timestamp: Utc::now(),
            device_id: "D1".to_string(),
            workspace_id: "github.com/o/r".to_string(),
            session_id: None,
            data: json!({}),
            blob_refs: vec![],
            ingested_at: None,
        }
    }

    #[test]
    fn rejects_empty_device_id() {
        let mut event = sample_event();
        event.device_id = "   ".to_string();
        assert!(validate_envelope(&event).is_err());
    }

    #[test]
    fn rejects_blob_ref_with_empty_key() {
        let mut event = sample_event();
        event.blob_refs.push(BlobRef {
            key: "".to_string(),
            content_type: "text/plain".to_string(),
            size_bytes: 0,
        });
        assert!(validate_envelope(&event).is_err());
    }

    #[test]
    fn accepts_a_well_formed_envelope() {
        assert!(validate_envelope(&sample_event()).is_ok());
    }

    #[test]
    fn rejects_non_object_data() {
        let mut event = sample_event();
        event.data = json!("not a map");
        assert!(validate_envelope(&event).is_err());

        let mut event = sample_event();
        event.data = json!([1, 2, 3]);
        assert!(validate_envelope(&event).is_err());
    }
}
