//! Workspace, device, and workspace-device junction rows (spec §3).

use crate::ids::{DeviceId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked repository or non-git context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Server-minted id.
    pub id: WorkspaceId,
    /// Stable external key; see [`crate::canonical_workspace_id`].
    pub canonical_id: String,
    /// Human-readable name, derived from the canonical id's tail.
    pub display_name: String,
    /// Default branch, once known from a `session.start` hint.
    pub default_branch: Option<String>,
}

impl Workspace {
    /// Derive a display name from a canonical id's final path segment.
    pub fn display_name_for(canonical_id: &str) -> String {
        canonical_id
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(canonical_id)
            .to_string()
    }
}

/// A developer workstation or CI runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Client-supplied identifier.
    pub id: DeviceId,
    /// Last time this device was seen in any event.
    pub last_seen_at: DateTime<Utc>,
    /// Human-readable name, if reported.
    pub name: Option<String>,
    /// Device type/class, if reported.
    pub device_type: Option<String>,
}

/// Records that a device has checked out a workspace at a local path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceDevice {
    /// The workspace.
    pub workspace_id: WorkspaceId,
    /// The device.
    pub device_id: DeviceId,
    /// Local checkout path on that device.
    pub local_path: String,
    /// Last time this pairing was observed.
    pub last_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_takes_the_final_path_segment() {
        assert_eq!(Workspace::display_name_for("github.com/o/r"), "r");
        assert_eq!(Workspace::display_name_for("_unassociated"), "_unassociated");
    }
}
