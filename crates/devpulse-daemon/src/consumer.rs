//! Durable-log consumer loop (spec §2, §4.C).
//!
//! Pulls batches from the event log's consumer group, drives each entry
//! through [`devpulse_processor::process_event`], fans a processed event out
//! over the broadcaster, enqueues the pipeline when a handler asks for it,
//! and acks only once processing returns `Ok` — a failed entry is left
//! pending for Redis to redeliver.

use devpulse_eventlog::EventLog;
use devpulse_pipeline::PipelineHandle;
use devpulse_processor::ProcessResult;
use devpulse_store::Store;
use devpulse_telemetry::IngestCounters;
use devpulse_ws::WsState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Entries pulled per `XREADGROUP` call.
const BATCH_SIZE: usize = 32;

/// How long a read blocks for new entries before looping back to check for
/// shutdown.
const BLOCK_MS: usize = 1_000;

/// Backoff after a failed read, so a down log doesn't spin the loop.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Run until `shutdown` is set to `true`. `main.rs` owns the `JoinHandle`
/// and the sending half of `shutdown`.
#[allow(clippy::too_many_arguments)]
pub async fn run_consumer(
    event_log: EventLog,
    store: Store,
    ingest_metrics: Arc<IngestCounters>,
    ws: WsState,
    pipeline: PipelineHandle,
    group: String,
    consumer_name: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let read = tokio::select! {
            result = event_log.read_pending(&group, &consumer_name, BATCH_SIZE, BLOCK_MS) => result,
            _ = shutdown.changed() => return,
        };

        let entries = match read {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "consumer: read_pending failed, backing off");
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
                continue;
            }
        };

        for entry in entries {
            match devpulse_processor::process_event(&store, &ingest_metrics, &entry.event).await {
                Ok(outcome) => {
                    if outcome.result == ProcessResult::Processed {
                        ws.broadcaster().broadcast_event(&outcome.resolved_event);
                    }
                    if let Some(session_id) = outcome.trigger_pipeline {
                        pipeline.enqueue_session(session_id);
                    }
                }
                Err(e) => {
                    ingest_metrics.record_retry();
                    tracing::warn!(
                        event_id = %entry.event.id,
                        error = %e,
                        "consumer: process_event failed, leaving entry unacked for redelivery"
                    );
                    continue;
                }
            }

            if let Err(e) = event_log.ack(&group, &entry.sequence_id).await {
                tracing::warn!(sequence_id = %entry.sequence_id, error = %e, "consumer: ack failed");
            }
        }
    }
}
