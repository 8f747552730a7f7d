//! Session rows and the session lifecycle state enum.
//!
//! The state machine's transition *logic* (optimistic guards, allowed-from
//! sets) lives in `devpulse-lifecycle`; this module only defines the shape
//! of the state itself, since it is part of the persisted data model.

use crate::ids::{DeviceId, SessionId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The finite lifecycle state of a session (spec §4.D).
///
/// Transitions are monotonic except that `failed` is reachable from any
/// state; see `devpulse-lifecycle` for the enforced DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Created on `session.start`, or on first transcript upload for backfill.
    Detected,
    /// A first transcript message has been observed.
    Capturing,
    /// `session.end` was processed.
    Ended,
    /// The pipeline has persisted all messages/blocks.
    Parsed,
    /// The summary generator returned, or summarization was skipped.
    Summarized,
    /// An operator archived the session.
    Archived,
    /// A pipeline step failed; reachable from any other state.
    Failed,
}

impl Lifecycle {
    /// Database wire form, matching the `#[serde(rename_all = "snake_case")]`
    /// representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Capturing => "capturing",
            Self::Ended => "ended",
            Self::Parsed => "parsed",
            Self::Summarized => "summarized",
            Self::Archived => "archived",
            Self::Failed => "failed",
        }
    }

    /// Parse the database wire form back into a [`Lifecycle`].
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "detected" => Self::Detected,
            "capturing" => Self::Capturing,
            "ended" => Self::Ended,
            "parsed" => Self::Parsed,
            "summarized" => Self::Summarized,
            "archived" => Self::Archived,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended, as reported by the client (`session.end` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Normal CLI exit.
    Exit,
    /// The user interrupted the session (Ctrl-C).
    Interrupt,
    /// The session crashed.
    Crash,
    /// Reason not recognized by the closed set above; preserved verbatim.
    Other(String),
}

impl EndReason {
    /// Parse the client-reported reason string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "exit" => Self::Exit,
            "interrupt" => Self::Interrupt,
            "crash" => Self::Crash,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire/database string form.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exit => "exit",
            Self::Interrupt => "interrupt",
            Self::Crash => "crash",
            Self::Other(s) => s,
        }
    }
}

/// A tracked Claude Code session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// External CC session id; the row's primary key.
    pub id: SessionId,
    /// Resolved workspace this session ran in.
    pub workspace_id: WorkspaceId,
    /// Device this session ran on.
    pub device_id: DeviceId,
    /// Current lifecycle state.
    pub lifecycle: Lifecycle,
    /// Transcript parse status, separate from lifecycle bookkeeping detail.
    pub parse_status: Option<String>,
    /// Working directory at session start.
    pub cwd: String,
    /// Git branch at session start, if known.
    pub git_branch: Option<String>,
    /// Git remote at session start, if known.
    pub git_remote: Option<String>,
    /// Model identifier, if reported.
    pub model: Option<String>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Session duration in milliseconds, once known.
    pub duration_ms: Option<i64>,
    /// Why the session ended, once known.
    pub end_reason: Option<String>,
    /// Object store key for the raw transcript, once uploaded.
    pub transcript_s3_key: Option<String>,
    /// Short summary, once the summary generator has run.
    pub summary: Option<String>,
    /// Estimated cost in USD, once the summary generator has run.
    pub cost_estimate_usd: Option<f64>,
    /// Highest `session.compact` sequence observed so far. The parser must
    /// treat this as non-decreasing and refuse lower values silently.
    pub compact_sequence: i64,
    /// Last time any field on this row was updated.
    pub updated_at: DateTime<Utc>,
}
