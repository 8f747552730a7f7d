//! Git activity persistence and session correlation (spec §4.E).

use crate::Store;
use chrono::{DateTime, Utc};
use devpulse_core::{Confidence, Correlation, DeviceId, GitActivityType, SessionId, WorkspaceId};
use serde_json::Value;
use sqlx::Row;

/// A git activity row ready to persist; correlation has already run.
#[derive(Debug, Clone)]
pub struct GitActivityRow {
    /// Equal to the originating event's id.
    pub id: String,
    /// Workspace this activity occurred in.
    pub workspace_id: WorkspaceId,
    /// Device this activity occurred on.
    pub device_id: DeviceId,
    /// Correlated session, if one was active.
    pub session_id: Option<SessionId>,
    /// Kind of git operation.
    pub activity_type: GitActivityType,
    /// Branch name.
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

impl Store {
    /// Find the session active on `(workspace_id, device_id)` at `at`,
    /// preferring the most recently started one (spec §4.E).
    pub async fn correlate_session(
        &self,
        workspace_id: &WorkspaceId,
        device_id: &DeviceId,
        at: DateTime<Utc>,
    ) -> Result<Correlation, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id FROM sessions
            WHERE workspace_id = $1 AND device_id = $2
                AND started_at <= $3 AND COALESCE(ended_at, now()) >= $3
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(workspace_id.to_string())
        .bind(device_id.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Correlation {
                session_id: Some(SessionId::new(r.get::<String, _>("id"))),
                confidence: Confidence::Exact,
            },
            None => Correlation {
                session_id: None,
                confidence: Confidence::None,
            },
        })
    }

    /// Insert the git activity row (idempotent on `id`) and, if a session was
    /// correlated, backfill the originating event's `session_id` — both in
    /// the same transaction so either both reflect correlation or neither
    /// does (spec §4.E).
    pub async fn insert_git_activity(&self, activity: &GitActivityRow) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO git_activity
                (id, workspace_id, device_id, session_id, activity_type, branch, commit_sha,
                 message, insertions, deletions, files_changed, timestamp, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&activity.id)
        .bind(activity.workspace_id.to_string())
        .bind(activity.device_id.as_str())
        .bind(activity.session_id.as_ref().map(SessionId::as_str))
        .bind(activity.activity_type.as_str())
        .bind(&activity.branch)
        .bind(&activity.commit_sha)
        .bind(&activity.message)
        .bind(activity.insertions)
        .bind(activity.deletions)
        .bind(activity.files_changed)
        .bind(activity.timestamp)
        .bind(&activity.data)
        .execute(&mut *tx)
        .await?;

        if let Some(session_id) = &activity.session_id {
            sqlx::query("UPDATE events SET session_id = $2 WHERE id = $1 AND session_id IS NULL")
                .bind(&activity.id)
                .bind(session_id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await
    }
}
