//! Newline-delimited transcript parsing (spec §4.F step 2).
//!
//! One raw line is one JSON object. `line_number` is preserved verbatim;
//! `ordinal` is assigned in parse order and is what `(session_id, ordinal)`
//! uniqueness keys the persist step on. Malformed individual lines are
//! logged and skipped rather than failing the whole document — a single
//! corrupt line from a client-side crash shouldn't strand the rest of a
//! session's transcript.

use chrono::{DateTime, Utc};
use devpulse_core::BlockType;
use serde::Deserialize;
use serde_json::Value;

/// A transcript message as parsed, before externalization or persistence.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Line number within the raw document.
    pub line_number: i64,
    /// Parse-order position; becomes the persisted `ordinal`.
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
    /// Compaction sequence in effect when this line was parsed.
    pub compact_sequence: i64,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary additional metadata (anything the raw line didn't map to
    /// a typed field).
    pub metadata: Value,
    /// Content blocks belonging to this message.
    pub blocks: Vec<ParsedBlock>,
}

/// A content block as parsed, before any size-threshold externalization.
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    /// Position within the owning message.
    pub block_order: i32,
    /// Block kind.
    pub block_type: BlockType,
    /// Raw inline text. Externalization (spec §4.F step 2) may later move
    /// this out to the object store and clear the field.
    pub content_text: Option<String>,
    /// Tool name, for `tool_use`/`tool_result` blocks.
    pub tool_name: Option<String>,
    /// Tool input, for `tool_use` blocks.
    pub tool_input: Option<Value>,
    /// Id correlating a `tool_result` block to its `tool_use` block.
    pub tool_result_id: Option<String>,
    /// Whether this block represents a tool error result.
    pub is_error: bool,
}

/// The wire shape of one raw transcript line. Modeled on the content-block
/// transcript format Claude Code itself emits: a message envelope with a
/// role, optional usage/cost, and an ordered array of typed content blocks.
#[derive(Debug, Deserialize)]
struct RawLine {
    role: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<RawUsage>,
    #[serde(default)]
    cost_usd: Option<f64>,
    #[serde(default)]
    compact_sequence: Option<i64>,
    #[serde(default)]
    content: Vec<RawBlock>,
    #[serde(flatten)]
    extra: Value,
}

#[derive(Debug, Deserialize, Default)]
struct RawUsage {
    #[serde(default)]
    input_tokens: Option<i64>,
    #[serde(default)]
    output_tokens: Option<i64>,
    #[serde(default)]
    cache_read_tokens: Option<i64>,
    #[serde(default)]
    cache_write_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        input: Option<Value>,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
}

/// Result of parsing a full transcript document.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Every message parsed, in ordinal order.
    pub messages: Vec<ParsedMessage>,
    /// Highest compaction sequence observed anywhere in the document,
    /// folded with the watermark the session already carried.
    pub final_compact_sequence: i64,
    /// Count of lines that failed to parse and were skipped.
    pub skipped_lines: usize,
}

/// Parse `raw` (newline-delimited JSON) into messages and blocks.
///
/// `starting_compact_sequence` seeds the non-decreasing watermark from the
/// session's already-persisted value (spec §4.D, §9): a `compact_sequence`
/// hint on a line that is lower than the running watermark is ignored, not
/// applied. After parsing, every message whose `compact_sequence` is below
/// the document's final maximum is marked `is_compacted` — a later
/// compaction event superseded it.
pub fn parse_transcript(raw: &[u8], starting_compact_sequence: i64) -> ParseResult {
    let text = String::from_utf8_lossy(raw);
    let mut messages = Vec::new();
    let mut watermark = starting_compact_sequence;
    let mut skipped_lines = 0usize;
    let mut ordinal = 0i64;

    for (idx, line) in text.lines().enumerate() {
        let line_number = (idx + 1) as i64;
        if line.trim().is_empty() {
            continue;
        }
        let raw_line: RawLine = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line_number, error = %e, "skipping malformed transcript line");
                skipped_lines += 1;
                continue;
            }
        };

        if let Some(hint) = raw_line.compact_sequence {
            if hint > watermark {
                watermark = hint;
            }
        }

        let blocks = raw_line
            .content
            .into_iter()
            .enumerate()
            .map(|(order, block)| parsed_block(order as i32, block))
            .collect();

        messages.push(ParsedMessage {
            line_number,
            ordinal,
            role: raw_line.role,
            model: raw_line.model,
            tokens_in: raw_line.usage.as_ref().and_then(|u| u.input_tokens),
            tokens_out: raw_line.usage.as_ref().and_then(|u| u.output_tokens),
            tokens_cache_read: raw_line.usage.as_ref().and_then(|u| u.cache_read_tokens),
            tokens_cache_write: raw_line.usage.as_ref().and_then(|u| u.cache_write_tokens),
            cost_usd: raw_line.cost_usd,
            compact_sequence: watermark,
            timestamp: raw_line.timestamp,
            metadata: raw_line.extra,
            blocks,
        });
        ordinal += 1;
    }

    ParseResult {
        messages,
        final_compact_sequence: watermark,
        skipped_lines,
    }
}

fn parsed_block(block_order: i32, raw: RawBlock) -> ParsedBlock {
    match raw {
        RawBlock::Text { text } => ParsedBlock {
            block_order,
            block_type: BlockType::Text,
            content_text: Some(text),
            tool_name: None,
            tool_input: None,
            tool_result_id: None,
            is_error: false,
        },
        RawBlock::Thinking { thinking } => ParsedBlock {
            block_order,
            block_type: BlockType::Thinking,
            content_text: Some(thinking),
            tool_name: None,
            tool_input: None,
            tool_result_id: None,
            is_error: false,
        },
        RawBlock::ToolUse { tool_name, input } => ParsedBlock {
            block_order,
            block_type: BlockType::ToolUse,
            content_text: None,
            tool_name,
            tool_input: input,
            tool_result_id: None,
            is_error: false,
        },
        RawBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ParsedBlock {
            block_order,
            block_type: BlockType::ToolResult,
            content_text: content,
            tool_name: None,
            tool_input: None,
            tool_result_id: tool_use_id,
            is_error,
        },
    }
}

/// Whether `message`'s compaction sequence is behind the document's final
/// watermark, i.e. a later compaction superseded it (spec §9).
pub fn is_compacted(message: &ParsedMessage, final_compact_sequence: i64) -> bool {
    message.compact_sequence < final_compact_sequence
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(json: &str) -> String {
        json.to_string()
    }

    #[test]
    fn parses_text_and_tool_blocks() {
        let doc = format!(
            "{}\n{}\n",
            line(r#"{"role":"user","timestamp":"2025-01-01T00:00:00Z","content":[{"type":"text","text":"hi"}]}"#),
            line(
                r#"{"role":"assistant","timestamp":"2025-01-01T00:00:01Z","content":[{"type":"tool_use","tool_name":"bash","input":{"cmd":"ls"}},{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}"#
            ),
        );
        let result = parse_transcript(doc.as_bytes(), 0);
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].ordinal, 0);
        assert_eq!(result.messages[1].ordinal, 1);
        assert_eq!(result.messages[1].blocks.len(), 2);
        assert_eq!(result.messages[1].blocks[0].block_type, BlockType::ToolUse);
        assert_eq!(result.messages[1].blocks[1].tool_result_id.as_deref(), Some("t1"));
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let doc = "not json at all\n{\"role\":\"user\",\"timestamp\":\"2025-01-01T00:00:00Z\",\"content\":[]}\n";
        let result = parse_transcript(doc.as_bytes(), 0);
        assert_eq!(result.skipped_lines, 1);
        assert_eq!(result.messages.len(), 1);
    }

    #[test]
    fn compact_sequence_watermark_is_non_decreasing() {
        let doc = format!(
            "{}\n{}\n{}\n",
            line(r#"{"role":"user","timestamp":"2025-01-01T00:00:00Z","content":[],"compact_sequence":1}"#),
            line(r#"{"role":"user","timestamp":"2025-01-01T00:00:01Z","content":[],"compact_sequence":0}"#),
            line(r#"{"role":"user","timestamp":"2025-01-01T00:00:02Z","content":[],"compact_sequence":3}"#),
        );
        let result = parse_transcript(doc.as_bytes(), 0);
        assert_eq!(result.final_compact_sequence, 3);
        // the regressive hint on line 2 never lowers the watermark
        assert_eq!(result.messages[1].compact_sequence, 1);
        assert_eq!(result.messages[2].compact_sequence, 3);
    }

    #[test]
    fn starting_watermark_seeds_from_the_persisted_session() {
        let doc = line(r#"{"role":"user","timestamp":"2025-01-01T00:00:00Z","content":[]}"#) + "\n";
        let result = parse_transcript(doc.as_bytes(), 5);
        assert_eq!(result.final_compact_sequence, 5);
        assert_eq!(result.messages[0].compact_sequence, 5);
    }

    #[test]
    fn messages_superseded_by_a_later_compaction_are_flagged() {
        let doc = format!(
            "{}\n{}\n",
            line(r#"{"role":"user","timestamp":"2025-01-01T00:00:00Z","content":[],"compact_sequence":1}"#),
            line(r#"{"role":"user","timestamp":"2025-01-01T00:00:01Z","content":[],"compact_sequence":2}"#),
        );
        let result = parse_transcript(doc.as_bytes(), 0);
        assert!(is_compacted(&result.messages[0], result.final_compact_sequence));
        assert!(!is_compacted(&result.messages[1], result.final_compact_sequence));
    }
}
