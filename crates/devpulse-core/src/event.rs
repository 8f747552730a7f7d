//! The wire event envelope and the closed set of registered event types.

use crate::ids::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The closed set of event types the wire protocol recognizes.
///
/// Unregistered types still pass envelope validation and are persisted, but
/// no payload schema or handler is dispatched for them (spec §4.C step 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// `session.start`
    SessionStart,
    /// `session.end`
    SessionEnd,
    /// `session.compact`
    SessionCompact,
    /// `git.commit`
    GitCommit,
    /// `git.push`
    GitPush,
    /// `git.checkout`
    GitCheckout,
    /// `git.merge`
    GitMerge,
    /// `remote.provision.start`
    RemoteProvisionStart,
    /// `remote.provision.ready`
    RemoteProvisionReady,
    /// `remote.provision.error`
    RemoteProvisionError,
    /// `remote.terminate`
    RemoteTerminate,
    /// `system.device.register`
    SystemDeviceRegister,
    /// `system.hooks.installed`
    SystemHooksInstalled,
    /// `system.heartbeat`
    SystemHeartbeat,
    /// Any type outside the closed set above. Passes through unvalidated.
    Unknown(String),
}

impl EventType {
    /// Parse a dotted wire type string (e.g. `"session.start"`) into an
    /// [`EventType`], falling back to [`EventType::Unknown`] for anything
    /// not in the closed set.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "session.start" => Self::SessionStart,
            "session.end" => Self::SessionEnd,
            "session.compact" => Self::SessionCompact,
            "git.commit" => Self::GitCommit,
            "git.push" => Self::GitPush,
            "git.checkout" => Self::GitCheckout,
            "git.merge" => Self::GitMerge,
            "remote.provision.start" => Self::RemoteProvisionStart,
            "remote.provision.ready" => Self::RemoteProvisionReady,
            "remote.provision.error" => Self::RemoteProvisionError,
            "remote.terminate" => Self::RemoteTerminate,
            "system.device.register" => Self::SystemDeviceRegister,
            "system.hooks.installed" => Self::SystemHooksInstalled,
            "system.heartbeat" => Self::SystemHeartbeat,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// `true` for the seven types spec §4.C registers a payload schema and
    /// handler for.
    pub fn is_registered(&self) -> bool {
        !matches!(self, Self::Unknown(_))
            && !matches!(
                self,
                Self::RemoteProvisionStart
                    | Self::RemoteProvisionReady
                    | Self::RemoteProvisionError
                    | Self::RemoteTerminate
                    | Self::SystemDeviceRegister
                    | Self::SystemHooksInstalled
                    | Self::SystemHeartbeat
            )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SessionStart => "session.start",
            Self::SessionEnd => "session.end",
            Self::SessionCompact => "session.compact",
            Self::GitCommit => "git.commit",
            Self::GitPush => "git.push",
            Self::GitCheckout => "git.checkout",
            Self::GitMerge => "git.merge",
            Self::RemoteProvisionStart => "remote.provision.start",
            Self::RemoteProvisionReady => "remote.provision.ready",
            Self::RemoteProvisionError => "remote.provision.error",
            Self::RemoteTerminate => "remote.terminate",
            Self::SystemDeviceRegister => "system.device.register",
            Self::SystemHooksInstalled => "system.hooks.installed",
            Self::SystemHeartbeat => "system.heartbeat",
            Self::Unknown(s) => s,
        };
        f.write_str(s)
    }
}

/// A reference to a large binary payload externalized to the object store
/// at ingest time (e.g. a pre-uploaded diff or screenshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Object store key.
    pub key: String,
    /// MIME type of the referenced blob.
    pub content_type: String,
    /// Size of the blob in bytes.
    pub size_bytes: u64,
}

/// The event envelope as it arrives over the wire and as it is persisted
/// (with `workspace_id` substituted for the resolved ULID — spec §4.C
/// step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dedup anchor. Presence of the row is the dedup signal.
    pub id: EventId,
    /// The event's dotted type string.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event occurred, per the client.
    pub timestamp: DateTime<Utc>,
    /// Client-supplied device identifier.
    pub device_id: String,
    /// Canonical workspace id on the wire; resolved ULID once persisted.
    pub workspace_id: String,
    /// CC session id, if this event is scoped to a session.
    pub session_id: Option<String>,
    /// Opaque, type-specific payload.
    pub data: Value,
    /// Large-payload references, defaulted to empty.
    #[serde(default)]
    pub blob_refs: Vec<BlobRef>,
    /// When the server first admitted this event into the durable log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,
}

impl Event {
    /// The closed-set [`EventType`] this event's wire type string maps to.
    pub fn event_type(&self) -> EventType {
        EventType::parse(&self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_type_round_trips_as_unknown() {
        let t = EventType::parse("system.heartbeat");
        assert!(!t.is_registered());
        let t = EventType::parse("totally.unrecognized");
        assert!(matches!(t, EventType::Unknown(_)));
        assert!(!t.is_registered());
    }

    #[test]
    fn registered_types_round_trip_through_display_and_parse() {
        for t in [
            EventType::SessionStart,
            EventType::SessionEnd,
            EventType::SessionCompact,
            EventType::GitCommit,
            EventType::GitPush,
            EventType::GitCheckout,
            EventType::GitMerge,
        ] {
            assert!(t.is_registered());
            assert_eq!(EventType::parse(&t.to_string()), t);
        }
    }

    #[test]
    fn blob_refs_default_to_empty_when_absent() {
        let raw = serde_json::json!({
            "id": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "type": "session.start",
            "timestamp": "2025-01-01T00:00:00Z",
            "device_id": "D1",
            "workspace_id": "github.com/o/r",
            "session_id": null,
            "data": {}
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert!(event.blob_refs.is_empty());
    }
}
