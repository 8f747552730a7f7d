//! Transcript message and content-block persistence (spec §4.F step 3).
//!
//! `(session_id, ordinal)` uniqueness makes the insert idempotent across
//! pipeline retries; everything for one session commits in a single
//! transaction.

use crate::Store;
use chrono::{DateTime, Utc};
use devpulse_core::BlockType;
use serde_json::Value;
use sqlx::Row;

/// A parsed transcript message awaiting a database-assigned id.
#[derive(Debug, Clone)]
pub struct NewTranscriptMessage {
    /// Line number in the raw newline-delimited transcript.
    pub line_number: i64,
    /// Position assigned in parse order.
    pub ordinal: i64,
    /// Message role.
    pub role: String,
    /// Model, if reported.
    pub model: Option<String>,
    /// Input token count.
    pub tokens_in: Option<i64>,
    /// Output token count.
    pub tokens_out: Option<i64>,
    /// Cache-read token count.
    pub tokens_cache_read: Option<i64>,
    /// Cache-write token count.
    pub tokens_cache_write: Option<i64>,
    /// Cost in USD attributed to this message.
    pub cost_usd: Option<f64>,
    /// Compaction sequence in effect when this message was parsed.
    pub compact_sequence: i64,
    /// Whether a later compaction dropped this message.
    pub is_compacted: bool,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary additional metadata.
    pub metadata: Value,
}

/// A parsed content block awaiting a database-assigned id, scoped to the
/// [`NewTranscriptMessage`] it belongs to.
#[derive(Debug, Clone)]
pub struct NewContentBlock {
    /// Position within the owning message.
    pub block_order: i32,
    /// Block kind.
    pub block_type: BlockType,
    /// Inline text, when not externalized.
    pub content_text: Option<String>,
    /// Tool name, for `tool_use`/`tool_result` blocks.
    pub tool_name: Option<String>,
    /// Tool input, for `tool_use` blocks.
    pub tool_input: Option<Value>,
    /// Id correlating a `tool_result` block to its `tool_use` block.
    pub tool_result_id: Option<String>,
    /// Object store key, when the body was externalized for size.
    pub result_s3_key: Option<String>,
    /// Whether this block represents a tool error result.
    pub is_error: bool,
}

impl Store {
    /// Persist every parsed message (and its blocks) for `session_id` in one
    /// transaction. Safe to call repeatedly for the same session: messages
    /// already present by `ordinal` are left untouched, and their existing
    /// row id is reused to insert any blocks not yet present.
    pub async fn persist_transcript(
        &self,
        session_id: &str,
        messages: &[(NewTranscriptMessage, Vec<NewContentBlock>)],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for (message, blocks) in messages {
            let inserted = sqlx::query(
                r#"
                INSERT INTO transcript_messages
                    (session_id, line_number, ordinal, role, model, tokens_in, tokens_out,
                     tokens_cache_read, tokens_cache_write, cost_usd, compact_sequence,
                     is_compacted, timestamp, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (session_id, ordinal) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(session_id)
            .bind(message.line_number)
            .bind(message.ordinal)
            .bind(&message.role)
            .bind(&message.model)
            .bind(message.tokens_in)
            .bind(message.tokens_out)
            .bind(message.tokens_cache_read)
            .bind(message.tokens_cache_write)
            .bind(message.cost_usd)
            .bind(message.compact_sequence)
            .bind(message.is_compacted)
            .bind(message.timestamp)
            .bind(&message.metadata)
            .fetch_optional(&mut *tx)
            .await?;

            let message_id: i64 = match inserted {
                Some(row) => row.get("id"),
                None => {
                    sqlx::query("SELECT id FROM transcript_messages WHERE session_id = $1 AND ordinal = $2")
                        .bind(session_id)
                        .bind(message.ordinal)
                        .fetch_one(&mut *tx)
                        .await?
                        .get("id")
                }
            };

            for block in blocks {
                sqlx::query(
                    r#"
                    INSERT INTO content_blocks
                        (message_id, session_id, block_order, block_type, content_text, tool_name,
                         tool_input, tool_result_id, result_s3_key, is_error)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ON CONFLICT (message_id, block_order) DO NOTHING
                    "#,
                )
                .bind(message_id)
                .bind(session_id)
                .bind(block.block_order)
                .bind(block.block_type.as_str())
                .bind(&block.content_text)
                .bind(&block.tool_name)
                .bind(&block.tool_input)
                .bind(&block.tool_result_id)
                .bind(&block.result_s3_key)
                .bind(block.is_error)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await
    }
}
