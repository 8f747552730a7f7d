//! Git activity rows produced by the git correlator (spec §4.E).

use crate::ids::{DeviceId, EventId, SessionId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of git operation a [`GitActivity`] row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitActivityType {
    /// A commit was made.
    Commit,
    /// A push was made.
    Push,
    /// A branch checkout (or detach) occurred.
    Checkout,
    /// A merge occurred.
    Merge,
}

impl GitActivityType {
    /// The wire/database string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Push => "push",
            Self::Checkout => "checkout",
            Self::Merge => "merge",
        }
    }
}

/// A single git operation observed on a device/workspace, optionally
/// correlated to the session that was active at the time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitActivity {
    /// Equal to the originating event's id (ensures idempotent insert).
    pub id: EventId,
    /// Workspace this activity occurred in.
    pub workspace_id: WorkspaceId,
    /// Device this activity occurred on.
    pub device_id: DeviceId,
    /// Correlated session, if one was active (spec §4.E).
    pub session_id: Option<SessionId>,
    /// Kind of git operation.
    pub activity_type: GitActivityType,
    /// Branch name (for `checkout`, `to_branch` or `to_ref`).
    pub branch: String,
    /// Commit SHA, where applicable.
    pub commit_sha: Option<String>,
    /// Commit/merge message, where applicable.
    pub message: Option<String>,
    /// Lines inserted, where applicable.
    pub insertions: Option<i64>,
    /// Lines deleted, where applicable.
    pub deletions: Option<i64>,
    /// Number of files changed, where applicable.
    pub files_changed: Option<i64>,
    /// When the activity occurred.
    pub timestamp: DateTime<Utc>,
    /// Raw type-specific payload.
    pub data: Value,
}

/// The correlation result for a git event (spec §4.E).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    /// The session found to be active at the event's timestamp, if any.
    pub session_id: Option<SessionId>,
    /// Confidence level of the correlation.
    pub confidence: Confidence,
}

/// How confident the correlator is in a [`Correlation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// No active session found for the window.
    None,
    /// A single active session was found by device+workspace+time window.
    Exact,
}
