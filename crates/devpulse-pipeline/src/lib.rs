//! devpulse-pipeline
//!
//! The post-processing pipeline (spec §4.F): a bounded worker pool that
//! fetches a session's uploaded transcript, parses it into messages and
//! content blocks, persists them, advances the lifecycle state machine,
//! and (if configured) calls out to the summary generator. Every step is
//! safe to retry — idempotent inserts and optimistic lifecycle guards mean
//! a rerun never duplicates work.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod parser;
mod pool;

pub use parser::{parse_transcript, ParseResult, ParsedBlock, ParsedMessage};
pub use pool::{Pipeline, PipelineHandle};

use devpulse_core::Lifecycle;
use devpulse_objectstore::{artifact_key, transcript_key, ObjectStore};
use devpulse_store::{NewContentBlock, NewTranscriptMessage, Store};
use devpulse_summary::{SummaryClient, SummaryMessage};
use devpulse_telemetry::PipelineCounters;
use devpulse_ws::{Broadcaster, SessionUpdate};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Tool-result bodies larger than this are externalized to the object
/// store rather than stored inline (spec §4.F step 2).
const EXTERNALIZE_THRESHOLD_BYTES: usize = 8 * 1024;

/// Upper bound on how many messages go into a single summary request
/// (spec §4.F step 5's "bounded selection").
const MAX_SUMMARY_MESSAGES: usize = 40;

/// Everything a pipeline run needs: storage, the object store, the
/// (possibly disabled) summary collaborator, and the broadcaster to
/// announce lifecycle changes on. Cheap to clone — every field is already
/// an `Arc`-backed handle.
#[derive(Clone)]
pub struct PipelineContext {
    store: Store,
    objects: ObjectStore,
    summary: SummaryClient,
    broadcaster: Broadcaster,
}

impl PipelineContext {
    /// Assemble a pipeline context from its dependencies.
    pub fn new(store: Store, objects: ObjectStore, summary: SummaryClient, broadcaster: Broadcaster) -> Self {
        Self {
            store,
            objects,
            summary,
            broadcaster,
        }
    }
}

/// How one `runSessionPipeline` invocation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The summary generator ran and the session reached `summarized`.
    Summarized,
    /// Summarization is disabled; the session still reached `summarized`
    /// with an empty summary (spec §4.D: "or was skipped by config").
    SummarizedSkipped,
    /// The summary call failed; the session stayed at `parsed` (spec §4.F).
    SummaryFailedStayedParsed,
    /// The transition to `parsed` found zero eligible rows — a rerun found
    /// the session already processed (or moved on) by a previous attempt.
    AlreadyProcessed,
    /// Fetch or parse failed; the session was transitioned to `failed`.
    Failed,
    /// The persist step failed; the lifecycle stays at `ended` so the next
    /// enqueue retries from the top (spec §4.F failure semantics).
    PersistFailedWillRetry,
    /// The session id or its workspace could not be resolved.
    SessionNotFound,
}

impl PipelineOutcome {
    /// Whether this counts as a successful pipeline run for metrics
    /// purposes. Backlog-retry and not-found outcomes are not failures of
    /// the worker itself, but they are not a finished job either.
    fn is_success(self) -> bool {
        !matches!(self, Self::Failed | Self::PersistFailedWillRetry)
    }
}

/// Run the full pipeline for one session (spec §4.F steps 1-6). Never
/// panics and never returns `Err` — every failure path resolves to a
/// [`PipelineOutcome`] variant and is logged at the point of failure, since
/// the worker pool driving this has nothing meaningful to propagate to.
pub async fn run_session_pipeline(ctx: &PipelineContext, session_id: &str) -> PipelineOutcome {
    let session = match ctx.store.get_session(session_id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            tracing::warn!(session_id, "pipeline run requested for unknown session");
            return PipelineOutcome::SessionNotFound;
        }
        Err(e) => {
            tracing::error!(session_id, error = %e, "pipeline: failed to load session");
            return PipelineOutcome::SessionNotFound;
        }
    };

    let workspace = match ctx.store.get_workspace(&session.workspace_id).await {
        Ok(Some(w)) => w,
        _ => {
            tracing::error!(session_id, "pipeline: session's workspace not found");
            return PipelineOutcome::SessionNotFound;
        }
    };

    let key = transcript_key(&workspace.canonical_id, session_id);
    let raw = match ctx.objects.get(&key).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(session_id, error = %e, "pipeline: transcript fetch failed");
            fail_and_broadcast(ctx, &session.workspace_id.to_string(), session_id).await;
            return PipelineOutcome::Failed;
        }
    };

    let parsed = parser::parse_transcript(&raw, session.compact_sequence);
    if parsed.skipped_lines > 0 {
        tracing::warn!(session_id, skipped = parsed.skipped_lines, "pipeline: some transcript lines were malformed");
    }

    let mut rows = Vec::with_capacity(parsed.messages.len());
    for message in &parsed.messages {
        let is_compacted = parser::is_compacted(message, parsed.final_compact_sequence);
        let blocks = externalize_blocks(ctx, session_id, message).await;
        let new_message = NewTranscriptMessage {
            line_number: message.line_number,
            ordinal: message.ordinal,
            role: message.role.clone(),
            model: message.model.clone(),
            tokens_in: message.tokens_in,
            tokens_out: message.tokens_out,
            tokens_cache_read: message.tokens_cache_read,
            tokens_cache_write: message.tokens_cache_write,
            cost_usd: message.cost_usd,
            compact_sequence: message.compact_sequence,
            is_compacted,
            timestamp: message.timestamp,
            metadata: message.metadata.clone(),
        };
        rows.push((new_message, blocks));
    }

    if let Err(e) = ctx.store.persist_transcript(session_id, &rows).await {
        tracing::error!(session_id, error = %e, "pipeline: persist failed, will retry on next enqueue");
        return PipelineOutcome::PersistFailedWillRetry;
    }

    let transitioned = match ctx
        .store
        .transition_to_parsed(session_id, devpulse_lifecycle::PARSABLE_FROM)
        .await
    {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(session_id, error = %e, "pipeline: transition to parsed failed");
            return PipelineOutcome::PersistFailedWillRetry;
        }
    };
    if !transitioned {
        tracing::debug!(session_id, "pipeline: session already past ended, skipping rest of run");
        return PipelineOutcome::AlreadyProcessed;
    }

    if !ctx.summary.enabled() {
        mark_summarized(ctx, &session.workspace_id.to_string(), session_id, "", 0.0).await;
        return PipelineOutcome::SummarizedSkipped;
    }

    let selection = select_summary_messages(&parsed.messages);
    match ctx.summary.summarize(session_id, selection).await {
        Ok(response) => {
            mark_summarized(
                ctx,
                &session.workspace_id.to_string(),
                session_id,
                &response.summary,
                response.cost_estimate_usd,
            )
            .await;
            PipelineOutcome::Summarized
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "pipeline: summary call failed, staying at parsed");
            PipelineOutcome::SummaryFailedStayedParsed
        }
    }
}

async fn externalize_blocks(
    ctx: &PipelineContext,
    session_id: &str,
    message: &ParsedMessage,
) -> Vec<NewContentBlock> {
    let mut blocks = Vec::with_capacity(message.blocks.len());
    for block in &message.blocks {
        let mut content_text = block.content_text.clone();
        let mut result_s3_key = None;

        if block.block_type == devpulse_core::BlockType::ToolResult {
            if let Some(text) = &content_text {
                if text.len() > EXTERNALIZE_THRESHOLD_BYTES {
                    let artifact_id = content_digest(text);
                    let key = artifact_key(session_id, &artifact_id, "txt");
                    match ctx.objects.put(&key, text.clone().into_bytes(), "text/plain").await {
                        Ok(()) => {
                            result_s3_key = Some(key);
                            content_text = None;
                        }
                        Err(e) => {
                            tracing::warn!(session_id, error = %e, "pipeline: tool-result externalization failed, keeping inline");
                        }
                    }
                }
            }
        }

        blocks.push(NewContentBlock {
            block_order: block.block_order,
            block_type: block.block_type,
            content_text,
            tool_name: block.tool_name.clone(),
            tool_input: block.tool_input.clone(),
            tool_result_id: block.tool_result_id.clone(),
            result_s3_key,
            is_error: block.is_error,
        });
    }
    blocks
}

/// A short, content-addressed artifact id: same content always maps to the
/// same key, so a pipeline retry re-externalizing the same block is a
/// no-op `put` rather than a fresh object every time.
fn content_digest(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for byte in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{byte:02x}"));
    }
    s.truncate(chars);
    s
}

fn select_summary_messages(messages: &[ParsedMessage]) -> Vec<SummaryMessage> {
    messages
        .iter()
        .rev()
        .take(MAX_SUMMARY_MESSAGES)
        .rev()
        .map(|m| SummaryMessage {
            role: m.role.clone(),
            content: m
                .blocks
                .iter()
                .filter(|b| b.block_type == devpulse_core::BlockType::Text)
                .filter_map(|b| b.content_text.clone())
                .reduce(|a, b| format!("{a}\n{b}")),
        })
        .collect()
}

async fn fail_and_broadcast(ctx: &PipelineContext, workspace_id: &str, session_id: &str) {
    if let Err(e) = ctx.store.transition_to_failed(session_id).await {
        tracing::error!(session_id, error = %e, "pipeline: failed to record failed transition");
    }
    ctx.broadcaster.broadcast_session_update(SessionUpdate {
        session_id: session_id.to_string(),
        workspace_id: workspace_id.to_string(),
        lifecycle: Lifecycle::Failed.as_str().to_string(),
        summary: None,
        stats: None,
    });
}

async fn mark_summarized(
    ctx: &PipelineContext,
    workspace_id: &str,
    session_id: &str,
    summary: &str,
    cost_estimate_usd: f64,
) {
    match ctx
        .store
        .transition_to_summarized(session_id, devpulse_lifecycle::SUMMARIZABLE_FROM, summary, cost_estimate_usd)
        .await
    {
        Ok(true) => {
            ctx.broadcaster.broadcast_session_update(SessionUpdate {
                session_id: session_id.to_string(),
                workspace_id: workspace_id.to_string(),
                lifecycle: Lifecycle::Summarized.as_str().to_string(),
                summary: if summary.is_empty() { None } else { Some(summary.to_string()) },
                stats: Some(serde_json::json!({ "cost_estimate_usd": cost_estimate_usd })),
            });
        }
        Ok(false) => {
            tracing::debug!(session_id, "pipeline: transition to summarized found no eligible row");
        }
        Err(e) => {
            tracing::error!(session_id, error = %e, "pipeline: transition to summarized failed");
        }
    }
}

/// Wraps [`PipelineCounters`] bookkeeping around [`run_session_pipeline`]
/// for the worker pool; exposed so a direct synchronous caller (tests, or
/// a CLI `devpulse process-session` escape hatch) can share the same path.
pub async fn run_session_pipeline_counted(
    ctx: &PipelineContext,
    session_id: &str,
    metrics: &Arc<PipelineCounters>,
) -> PipelineOutcome {
    metrics.record_dequeued();
    let outcome = run_session_pipeline(ctx, session_id).await;
    if outcome == PipelineOutcome::PersistFailedWillRetry {
        metrics.record_retry();
    }
    metrics.record_finished(outcome.is_success());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_digest_is_stable_for_identical_content() {
        assert_eq!(content_digest("hello world"), content_digest("hello world"));
        assert_ne!(content_digest("hello world"), content_digest("goodbye world"));
        assert_eq!(content_digest("hello world").len(), 16);
    }

    #[test]
    fn select_summary_messages_caps_at_the_bound_and_keeps_the_tail() {
        let messages: Vec<ParsedMessage> = (0..100)
            .map(|i| ParsedMessage {
                line_number: i,
                ordinal: i,
                role: "user".to_string(),
                model: None,
                tokens_in: None,
                tokens_out: None,
                tokens_cache_read: None,
                tokens_cache_write: None,
                cost_usd: None,
                compact_sequence: 0,
                timestamp: chrono::Utc::now(),
                metadata: serde_json::json!({}),
                blocks: vec![],
            })
            .collect();
        let selection = select_summary_messages(&messages);
        assert_eq!(selection.len(), MAX_SUMMARY_MESSAGES);
    }
}
