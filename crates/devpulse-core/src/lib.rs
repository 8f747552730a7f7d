//! devpulse-core
//!
//! The stable data model for the devpulse event pipeline: workspaces,
//! devices, sessions, events, transcript messages, content blocks, and git
//! activity. If you only take one dependency, take this one.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Canonical workspace identifier derivation.
pub mod canonical;
/// Event envelope and the closed set of registered event types.
pub mod event;
/// Git activity rows produced by the git correlator.
pub mod git;
/// Newtype identifiers used throughout the pipeline.
pub mod ids;
/// Session rows and the session lifecycle state enum.
pub mod session;
/// Parsed transcript messages and content blocks.
pub mod transcript;
/// Workspace, device, and workspace-device junction rows.
pub mod workspace;

pub use canonical::canonical_workspace_id;
pub use event::{BlobRef, Event, EventType};
pub use git::{Confidence, Correlation, GitActivity, GitActivityType};
pub use ids::{DeviceId, EventId, SessionId, WorkspaceId};
pub use session::{EndReason, Lifecycle, Session};
pub use transcript::{BlockType, ContentBlock, TranscriptMessage};
pub use workspace::{Device, Workspace, WorkspaceDevice};

/// Sentinel canonical id used for non-git contexts.
pub const UNASSOCIATED_WORKSPACE: &str = "_unassociated";
