//! Parsed transcript messages and content blocks (spec §3, §4.F step 2).

use crate::ids::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message parsed out of a session's transcript.
///
/// `(session_id, ordinal)` is unique within a session, which is what makes
/// the pipeline's persist step idempotent across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// Row id.
    pub id: i64,
    /// Owning session.
    pub session_id: SessionId,
    /// Line number within the raw newline-delimited transcript.
    pub line_number: i64,
    /// Strictly increasing position within the session's transcript.
    pub ordinal: i64,
    /// Message role (`user`, `assistant`, `system`, ...).
    pub role: String,
    /// Model that produced this message, if applicable.
    pub model: Option<String>,
    /// Input token count, if reported.
    pub tokens_in: Option<i64>,
    /// Output token count, if reported.
    pub tokens_out: Option<i64>,
    /// Cache-read token count, if reported.
    pub tokens_cache_read: Option<i64>,
    /// Cache-write token count, if reported.
    pub tokens_cache_write: Option<i64>,
    /// Cost in USD attributed to this message, if reported.
    pub cost_usd: Option<f64>,
    /// Non-decreasing compaction sequence hint (spec §4.D, §9).
    pub compact_sequence: i64,
    /// Whether this message was dropped by a later compaction.
    pub is_compacted: bool,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary additional metadata.
    pub metadata: Value,
}

impl TranscriptMessage {
    /// The combined cache token count, derived on read (spec §9 open
    /// question: persist the split fields, derive the aggregate).
    pub fn tokens_cache(&self) -> Option<i64> {
        match (self.tokens_cache_read, self.tokens_cache_write) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        }
    }
}

/// The kind of a parsed content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Plain text.
    Text,
    /// Model "thinking" content.
    Thinking,
    /// A tool invocation.
    ToolUse,
    /// The result of a tool invocation.
    ToolResult,
}

impl BlockType {
    /// The wire/database string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
        }
    }
}

/// A single content block within a [`TranscriptMessage`].
///
/// Large tool-result bodies are externalized to the object store; when
/// `result_s3_key` is set, `content_text` is the externalization marker
/// rather than the body itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Row id.
    pub id: i64,
    /// Owning message.
    pub message_id: i64,
    /// Owning session (denormalized for query convenience).
    pub session_id: SessionId,
    /// Position within the owning message.
    pub block_order: i32,
    /// Block kind.
    pub block_type: BlockType,
    /// Inline text content, when not externalized.
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
