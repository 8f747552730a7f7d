//! Newtype identifiers.
//!
//! Workspaces and events get server-minted ULIDs. Devices and sessions keep
//! whatever identifier the client supplied — the spec treats `sessions.id`
//! as externally owned and never renames it.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// A server-minted workspace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub Ulid);

impl WorkspaceId {
    /// Mint a fresh, time-ordered workspace id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A server-minted event identifier. Also serves as the dedup anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Ulid);

impl EventId {
    /// Mint a fresh, time-ordered event id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse an event id from its 26-character Crockford Base32 form.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ulid::from_string(s).map(Self)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client-supplied device identifier. Upserted on first sight, never
/// reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Wrap a raw device identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client-supplied session identifier (the CC session id). The system
/// treats it as stable but externally owned; it is never renamed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wrap a raw session identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_ids_are_time_ordered_when_generated_in_sequence() {
        let a = WorkspaceId::new();
        let b = WorkspaceId::new();
        assert!(a.0.timestamp_ms() <= b.0.timestamp_ms());
    }

    #[test]
    fn event_id_round_trips_through_display_and_parse() {
        let id = EventId::new();
        let parsed = EventId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn device_and_session_ids_preserve_the_raw_client_string() {
        let d = DeviceId::new("D1");
        let s = SessionId::new("S1");
        assert_eq!(d.as_str(), "D1");
        assert_eq!(s.as_str(), "S1");
    }
}
