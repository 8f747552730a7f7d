//! Canonical workspace id derivation.
//!
//! The canonical id is the stable external key for a workspace, computed
//! from a git remote (if any) before a [`crate::WorkspaceId`] ULID is ever
//! minted. See spec §3 (Workspace) for the three forms.

use crate::UNASSOCIATED_WORKSPACE;
use sha2::{Digest, Sha256};

/// Derive the canonical workspace id from an optional git remote and an
/// optional local path.
///
/// - If `remote` is present, normalize it (lowercase host+path, strip a
///   trailing `.git`) and return `host/path`.
/// - Else if `local_path` is present, return `local:<sha256(path)>`.
/// - Else return the `_unassociated` sentinel.
pub fn canonical_workspace_id(remote: Option<&str>, local_path: Option<&str>) -> String {
    if let Some(remote) = remote.filter(|r| !r.trim().is_empty()) {
        return normalize_remote(remote);
    }
    if let Some(path) = local_path.filter(|p| !p.trim().is_empty()) {
        let digest = Sha256::digest(path.as_bytes());
        return format!("local:{:x}", digest);
    }
    UNASSOCIATED_WORKSPACE.to_string()
}

/// Normalize a git remote URL into `host/path`, lowercased, `.git`-stripped.
///
/// Handles both `ssh`-style (`git@host:owner/repo.git`) and URL-style
/// (`https://host/owner/repo.git`) remotes.
fn normalize_remote(remote: &str) -> String {
    let trimmed = remote.trim();

    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .or_else(|| trimmed.strip_prefix("ssh://"))
        .or_else(|| trimmed.strip_prefix("git://"))
        .unwrap_or(trimmed);

    // ssh shorthand: git@host:owner/repo(.git)
    let normalized = if let Some((host_part, path_part)) = without_scheme.split_once(':') {
        if !host_part.contains('/') {
            let host = host_part.split('@').next_back().unwrap_or(host_part);
            format!("{host}/{path_part}")
        } else {
            without_scheme.to_string()
        }
    } else {
        without_scheme.to_string()
    };

    // strip any leading user@ in URL-style remotes
    let normalized = match normalized.split_once('@') {
        Some((_, rest)) if normalized.contains('/') && !rest.is_empty() => rest.to_string(),
        _ => normalized,
    };

    let normalized = normalized.trim_end_matches('/');
    let normalized = normalized.strip_suffix(".git").unwrap_or(normalized);

    normalized.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_remote_normalizes_to_host_path() {
        assert_eq!(
            canonical_workspace_id(Some("https://github.com/o/r.git"), None),
            "github.com/o/r"
        );
    }

    #[test]
    fn ssh_shorthand_remote_normalizes_the_same_as_https() {
        assert_eq!(
            canonical_workspace_id(Some("git@github.com:o/r.git"), None),
            "github.com/o/r"
        );
    }

    #[test]
    fn mixed_case_remote_is_lowercased() {
        assert_eq!(
            canonical_workspace_id(Some("https://GitHub.com/O/R.git"), None),
            "github.com/o/r"
        );
    }

    #[test]
    fn local_path_without_remote_hashes_to_a_stable_id() {
        let a = canonical_workspace_id(None, Some("/tmp/repo"));
        let b = canonical_workspace_id(None, Some("/tmp/repo"));
        assert_eq!(a, b);
        assert!(a.starts_with("local:"));
    }

    #[test]
    fn no_remote_and_no_path_falls_back_to_unassociated() {
        assert_eq!(canonical_workspace_id(None, None), "_unassociated");
    }
}
