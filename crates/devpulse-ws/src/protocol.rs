//! Wire shapes for the subscription protocol (spec §4.G).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client→server frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Declare interest in a scope.
    Subscribe(ScopeRequest),
    /// Withdraw interest in a scope.
    Unsubscribe(ScopeRequest),
    /// Reply to a server `ping`.
    Pong,
}

/// The scope named in a `subscribe`/`unsubscribe` frame. Exactly one of the
/// three shapes is present on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScopeRequest {
    /// `{"scope": "all"}`
    All {
        /// Always `"all"`.
        scope: AllTag,
    },
    /// `{"workspace_id": "..."}`
    Workspace {
        /// The workspace to scope to.
        workspace_id: String,
    },
    /// `{"session_id": "..."}`
    Session {
        /// The session to scope to.
        session_id: String,
    },
}

/// A marker type so `{"scope": "all"}` only deserializes when the value is
/// literally `"all"`.
#[derive(Debug, Clone, Deserialize)]
pub enum AllTag {
    /// The literal string `"all"`.
    #[serde(rename = "all")]
    All,
}

impl ScopeRequest {
    /// Render this scope as the canonical subscription-set key.
    pub fn key(&self) -> String {
        match self {
            Self::All { .. } => "all".to_string(),
            Self::Workspace { workspace_id } => format!("workspace:{workspace_id}"),
            Self::Session { session_id } => format!("session:{session_id}"),
        }
    }
}

/// A server→client frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A newly processed event, fanned out to matching subscribers.
    Event {
        /// The event payload, as persisted.
        event: Value,
    },
    /// A session lifecycle/summary change.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session id.
        session_id: String,
        /// Current lifecycle, as its wire string.
        lifecycle: String,
        /// Summary text, once available.
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        /// Arbitrary stats payload (token counts, cost, etc).
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<Value>,
    },
    /// A remote environment status change (reserved; spec §4.G).
    #[serde(rename = "remote.update")]
    RemoteUpdate {
        /// Remote environment id.
        remote_env_id: String,
        /// Owning workspace.
        workspace_id: String,
        /// Current status string.
        status: String,
        /// Public IP, once assigned.
        #[serde(skip_serializing_if = "Option::is_none")]
        public_ip: Option<String>,
    },
    /// Periodic keepalive.
    Ping,
    /// Acknowledges a `subscribe` frame.
    Subscribed {
        /// The subscription key that was added.
        scope: String,
    },
    /// Acknowledges an `unsubscribe` frame.
    Unsubscribed {
        /// The subscription key that was removed.
        scope: String,
    },
    /// A malformed client frame.
    Error {
        /// Human-readable detail.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_all_parses() {
        let raw = r#"{"type":"subscribe","scope":"all"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Subscribe(scope) => assert_eq!(scope.key(), "all"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn subscribe_workspace_parses() {
        let raw = r#"{"type":"subscribe","workspace_id":"W1"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Subscribe(scope) => assert_eq!(scope.key(), "workspace:W1"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn server_frame_session_update_serializes_without_null_fields() {
        let frame = ServerFrame::SessionUpdate {
            session_id: "S1".to_string(),
            lifecycle: "parsed".to_string(),
            summary: None,
            stats: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("summary").is_none());
        assert!(json.get("stats").is_none());
    }
}
