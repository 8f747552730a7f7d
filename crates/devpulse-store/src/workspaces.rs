//! Identity resolution queries backing `devpulse-identity` (spec §4.A).

use crate::Store;
use devpulse_core::{DeviceId, Workspace, WorkspaceId};
use sqlx::Row;

impl Store {
    /// Upsert-by-canonical-id. On first sight, allocates a new [`WorkspaceId`]
    /// and stores `display_name`/`default_branch`; on subsequent sight,
    /// backfills `default_branch` only if it was previously null. A single
    /// `INSERT ... ON CONFLICT DO UPDATE ... RETURNING` statement makes this
    /// atomic under concurrent callers without a cross-workspace lock.
    pub async fn resolve_or_create_workspace(
        &self,
        canonical_id: &str,
        default_branch_hint: Option<&str>,
    ) -> Result<WorkspaceId, sqlx::Error> {
        let new_id = WorkspaceId::new();
        let display_name = Workspace::display_name_for(canonical_id);
        let row = sqlx::query(
            r#"
            INSERT INTO workspaces (id, canonical_id, display_name, default_branch)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (canonical_id) DO UPDATE
                SET default_branch = COALESCE(workspaces.default_branch, EXCLUDED.default_branch)
            RETURNING id
            "#,
        )
        .bind(new_id.to_string())
        .bind(canonical_id)
        .bind(&display_name)
        .bind(default_branch_hint)
        .fetch_one(&self.pool)
        .await?;

        let id_text: String = row.get("id");
        parse_workspace_id(&id_text)
    }

    /// Fetch a workspace by its resolved id.
    pub async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, canonical_id, display_name, default_branch FROM workspaces WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let id_text: String = r.get("id");
            Ok(Workspace {
                id: parse_workspace_id(&id_text)?,
                canonical_id: r.get("canonical_id"),
                display_name: r.get("display_name"),
                default_branch: r.get("default_branch"),
            })
        })
        .transpose()
    }

    /// Upsert the device's `last_seen_at`. IDs are client-supplied and never
    /// reassigned, so this is a plain insert-or-touch.
    pub async fn resolve_or_create_device(&self, device_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, last_seen_at)
            VALUES ($1, now())
            ON CONFLICT (id) DO UPDATE SET last_seen_at = now()
            "#,
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that `device_id` has checked out `workspace_id` at
    /// `local_path`, touching `last_seen_at` on repeat sightings.
    pub async fn ensure_workspace_device_link(
        &self,
        workspace_id: &WorkspaceId,
        device_id: &DeviceId,
        local_path: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workspace_devices (workspace_id, device_id, local_path, last_seen_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (workspace_id, device_id, local_path)
                DO UPDATE SET last_seen_at = now()
            "#,
        )
        .bind(workspace_id.to_string())
        .bind(device_id.as_str())
        .bind(local_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_workspace_id(raw: &str) -> Result<WorkspaceId, sqlx::Error> {
    ulid::Ulid::from_string(raw)
        .map(WorkspaceId)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
