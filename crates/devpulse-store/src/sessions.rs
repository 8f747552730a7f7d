//! Session row persistence and the optimistic lifecycle transition
//! primitive (spec §4.D). The transition DAG itself is enforced by
//! `devpulse-lifecycle`; this module only executes the conditional updates.

use crate::Store;
use chrono::{DateTime, Utc};
use devpulse_core::{DeviceId, Lifecycle, Session, SessionId, WorkspaceId};
use sqlx::Row;

impl Store {
    /// Insert a `detected` session row keyed by the client's `cc_session_id`.
    /// Returns `false` if the row already existed (duplicate `session.start`;
    /// the spec requires the first observation's fields stay authoritative).
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_session_start(
        &self,
        id: &str,
        workspace_id: &WorkspaceId,
        device_id: &DeviceId,
        cwd: &str,
        git_branch: Option<&str>,
        git_remote: Option<&str>,
        model: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions
                (id, workspace_id, device_id, lifecycle, cwd, git_branch, git_remote, model, started_at, updated_at)
            VALUES ($1, $2, $3, 'detected', $4, $5, $6, $7, $8, now())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(workspace_id.to_string())
        .bind(device_id.as_str())
        .bind(cwd)
        .bind(git_branch)
        .bind(git_remote)
        .bind(model)
        .bind(started_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Conditional update: succeeds only if the row's current lifecycle is
    /// one of `allowed_from`. Zero rows affected means a losing race or an
    /// invalid transition — the caller must not retry blindly.
    pub async fn transition_to_ended(
        &self,
        id: &str,
        allowed_from: &[Lifecycle],
        ended_at: DateTime<Utc>,
        end_reason: &str,
        duration_ms: i64,
    ) -> Result<bool, sqlx::Error> {
        let allowed: Vec<&str> = allowed_from.iter().map(Lifecycle::as_str).collect();
        let result = sqlx::query(
            r#"
            UPDATE sessions
                SET lifecycle = 'ended', ended_at = $2, end_reason = $3, duration_ms = $4, updated_at = now()
                WHERE id = $1 AND lifecycle = ANY($5)
            "#,
        )
        .bind(id)
        .bind(ended_at)
        .bind(end_reason)
        .bind(duration_ms)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `detected|capturing -> capturing`, entered on the first observed
    /// transcript message.
    pub async fn transition_to_capturing(
        &self,
        id: &str,
        allowed_from: &[Lifecycle],
    ) -> Result<bool, sqlx::Error> {
        let allowed: Vec<&str> = allowed_from.iter().map(Lifecycle::as_str).collect();
        let result = sqlx::query(
            "UPDATE sessions SET lifecycle = 'capturing', updated_at = now() WHERE id = $1 AND lifecycle = ANY($2)",
        )
        .bind(id)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `ended -> parsed`, after the pipeline persists all messages/blocks.
    pub async fn transition_to_parsed(
        &self,
        id: &str,
        allowed_from: &[Lifecycle],
    ) -> Result<bool, sqlx::Error> {
        let allowed: Vec<&str> = allowed_from.iter().map(Lifecycle::as_str).collect();
        let result = sqlx::query(
            "UPDATE sessions SET lifecycle = 'parsed', updated_at = now() WHERE id = $1 AND lifecycle = ANY($2)",
        )
        .bind(id)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `parsed -> summarized`, recording the summary and cost estimate.
    pub async fn transition_to_summarized(
        &self,
        id: &str,
        allowed_from: &[Lifecycle],
        summary: &str,
        cost_estimate_usd: f64,
    ) -> Result<bool, sqlx::Error> {
        let allowed: Vec<&str> = allowed_from.iter().map(Lifecycle::as_str).collect();
        let result = sqlx::query(
            r#"
            UPDATE sessions
                SET lifecycle = 'summarized', summary = $2, cost_estimate_usd = $3, updated_at = now()
                WHERE id = $1 AND lifecycle = ANY($4)
            "#,
        )
        .bind(id)
        .bind(summary)
        .bind(cost_estimate_usd)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Any state `-> archived`, an operator action.
    pub async fn transition_to_archived(
        &self,
        id: &str,
        allowed_from: &[Lifecycle],
    ) -> Result<bool, sqlx::Error> {
        let allowed: Vec<&str> = allowed_from.iter().map(Lifecycle::as_str).collect();
        let result = sqlx::query(
            "UPDATE sessions SET lifecycle = 'archived', updated_at = now() WHERE id = $1 AND lifecycle = ANY($2)",
        )
        .bind(id)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `* -> failed`, legal from any state, unconditionally.
    pub async fn transition_to_failed(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE sessions SET lifecycle = 'failed', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Set `transcript_s3_key` and return the **post-write** lifecycle via
    /// `RETURNING`, avoiding the stale-read race against `session.end`
    /// (spec §4.I step 6, §9).
    pub async fn set_transcript_key(
        &self,
        id: &str,
        s3_key: &str,
    ) -> Result<Option<Lifecycle>, sqlx::Error> {
        let row = sqlx::query(
            "UPDATE sessions SET transcript_s3_key = $2, updated_at = now() WHERE id = $1 RETURNING lifecycle",
        )
        .bind(id)
        .bind(s3_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let raw: String = r.get("lifecycle");
            Lifecycle::parse(&raw).ok_or_else(|| {
                sqlx::Error::Decode(format!("unrecognized lifecycle {raw:?}").into())
            })
        })
        .transpose()
    }

    /// Record a `session.compact` sequence hint if it advances the session's
    /// current watermark; refuses lower values silently, per spec §9.
    /// Returns `true` if the watermark advanced.
    pub async fn bump_compact_sequence(&self, id: &str, sequence: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET compact_sequence = $2, updated_at = now() WHERE id = $1 AND compact_sequence < $2",
        )
        .bind(id)
        .bind(sequence)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Fetch a session row.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, workspace_id, device_id, lifecycle, parse_status, cwd, git_branch, git_remote,
                   model, started_at, ended_at, duration_ms, end_reason, transcript_s3_key, summary,
                   cost_estimate_usd, compact_sequence, updated_at
            FROM sessions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }
}

fn session_from_row(r: sqlx::postgres::PgRow) -> Result<Session, sqlx::Error> {
    let workspace_id_text: String = r.get("workspace_id");
    let lifecycle_text: String = r.get("lifecycle");
    Ok(Session {
        id: SessionId::new(r.get::<String, _>("id")),
        workspace_id: ulid::Ulid::from_string(&workspace_id_text)
            .map(WorkspaceId)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        device_id: DeviceId::new(r.get::<String, _>("device_id")),
        lifecycle: Lifecycle::parse(&lifecycle_text).ok_or_else(|| {
            sqlx::Error::Decode(format!("unrecognized lifecycle {lifecycle_text:?}").into())
        })?,
        parse_status: r.get("parse_status"),
        cwd: r.get("cwd"),
        git_branch: r.get("git_branch"),
        git_remote: r.get("git_remote"),
        model: r.get("model"),
        started_at: r.get("started_at"),
        ended_at: r.get("ended_at"),
        duration_ms: r.get("duration_ms"),
        end_reason: r.get("end_reason"),
        transcript_s3_key: r.get("transcript_s3_key"),
        summary: r.get("summary"),
        cost_estimate_usd: r.get("cost_estimate_usd"),
        compact_sequence: r.get("compact_sequence"),
        updated_at: r.get("updated_at"),
    })
}
