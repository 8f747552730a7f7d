//! Idempotent event persistence (spec §4.C step 4).

use crate::Store;
use devpulse_core::{BlobRef, Event, EventId, WorkspaceId};
use sqlx::Row;

impl Store {
    /// Insert the event row with `workspace_id` substituted for the resolved
    /// ULID. Returns `true` if the row was newly inserted, `false` if `id`
    /// was already present (a duplicate — handlers must not run).
    pub async fn insert_event(
        &self,
        event: &Event,
        resolved_workspace_id: &WorkspaceId,
    ) -> Result<bool, sqlx::Error> {
        let blob_refs = serde_json::to_value(&event.blob_refs).unwrap_or(serde_json::json!([]));
        let result = sqlx::query(
            r#"
            INSERT INTO events (id, event_type, timestamp, device_id, workspace_id, session_id, data, blob_refs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.event_type)
        .bind(event.timestamp)
        .bind(&event.device_id)
        .bind(resolved_workspace_id.to_string())
        .bind(&event.session_id)
        .bind(&event.data)
        .bind(blob_refs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fetch a persisted event by id.
    pub async fn get_event(&self, id: &EventId) -> Result<Option<Event>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, event_type, timestamp, device_id, workspace_id, session_id, data, blob_refs, ingested_at \
             FROM events WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let id_text: String = r.get("id");
            let blob_refs: serde_json::Value = r.get("blob_refs");
            let blob_refs: Vec<BlobRef> = serde_json::from_value(blob_refs).unwrap_or_default();
            Ok(Event {
                id: EventId::parse(&id_text).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                event_type: r.get("event_type"),
                timestamp: r.get("timestamp"),
                device_id: r.get("device_id"),
                workspace_id: r.get("workspace_id"),
                session_id: r.get("session_id"),
                data: r.get("data"),
                blob_refs,
                ingested_at: r.get("ingested_at"),
            })
        })
        .transpose()
    }
}
