//! devpulse-telemetry
//!
//! Structured metrics and `tracing` subscriber setup for the devpulse daemon.
//! Counters are plain atomics behind an `Arc`-able collector rather than a
//! recorded-run log: the pipeline and ingest boundary care about running
//! totals and current gauges, not per-run percentiles.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber.
///
/// Mirrors the daemon's `--debug` flag: debug mode widens the filter to
/// `devpulse=debug`, otherwise `devpulse=info`.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("devpulse=debug,tower_http=debug")
    } else {
        EnvFilter::new("devpulse=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ---------------------------------------------------------------------------
// Ingest metrics
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of ingest-boundary counters (spec §4.C).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestMetrics {
    /// Envelopes accepted and appended to the durable log.
    pub events_received: u64,
    /// Envelopes rejected for being malformed (spec §4.C step 1).
    pub events_invalid: u64,
    /// Envelopes whose event id was already present (spec §4.C step 4).
    pub events_duplicate: u64,
    /// Handler invocations that returned an error after the event persisted.
    pub handler_errors: u64,
    /// Transcript uploads accepted.
    pub uploads_received: u64,
    /// Transcript uploads rejected as already-uploaded (spec §5).
    pub uploads_duplicate: u64,
    /// Entries left unacked for the log to redeliver after a failed
    /// `process_event`.
    pub events_redelivered: u64,
}

/// Thread-safe counters backing [`IngestMetrics`].
#[derive(Debug, Default)]
pub struct IngestCounters {
    events_received: AtomicU64,
    events_invalid: AtomicU64,
    events_duplicate: AtomicU64,
    handler_errors: AtomicU64,
    uploads_received: AtomicU64,
    uploads_duplicate: AtomicU64,
    events_redelivered: AtomicU64,
}

impl IngestCounters {
    /// Create a fresh, zeroed counter set wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a successfully ingested event.
    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope that failed validation.
    pub fn record_invalid(&self) {
        self.events_invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate event id.
    pub fn record_duplicate(&self) {
        self.events_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler error.
    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully ingested transcript upload.
    pub fn record_upload_received(&self) {
        self.uploads_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transcript upload rejected as a duplicate.
    pub fn record_upload_duplicate(&self) {
        self.uploads_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entry left unacked for the durable log to redeliver.
    pub fn record_retry(&self) {
        self.events_redelivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> IngestMetrics {
        IngestMetrics {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_invalid: self.events_invalid.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            uploads_received: self.uploads_received.load(Ordering::Relaxed),
            uploads_duplicate: self.uploads_duplicate.load(Ordering::Relaxed),
            events_redelivered: self.events_redelivered.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline metrics
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of post-processing pipeline counters (spec §4.F).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineMetrics {
    /// Jobs submitted to the bounded queue.
    pub jobs_submitted: u64,
    /// Jobs dropped because the queue was full (spec §4.F backpressure).
    pub jobs_dropped: u64,
    /// Jobs that ran a step and succeeded.
    pub jobs_succeeded: u64,
    /// Jobs that exhausted retries and were marked `failed`.
    pub jobs_failed: u64,
    /// Individual step retry attempts across all jobs.
    pub step_retries: u64,
    /// Current number of jobs sitting in the queue.
    pub queue_depth: i64,
    /// Current number of jobs actively running.
    pub active_workers: i64,
}

/// Thread-safe counters and gauges backing [`PipelineMetrics`].
#[derive(Debug, Default)]
pub struct PipelineCounters {
    jobs_submitted: AtomicU64,
    jobs_dropped: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    step_retries: AtomicU64,
    queue_depth: AtomicI64,
    active_workers: AtomicI64,
}

impl PipelineCounters {
    /// Create a fresh, zeroed counter set wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a job accepted into the queue and bump the depth gauge.
    pub fn record_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job dropped for backpressure (never entered the queue).
    pub fn record_dropped(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job leaving the queue and entering a worker.
    pub fn record_dequeued(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job finishing, successfully or not.
    pub fn record_finished(&self, succeeded: bool) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
        if succeeded {
            self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a single step retry attempt.
    pub fn record_retry(&self) {
        self.step_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters and gauges.
    pub fn snapshot(&self) -> PipelineMetrics {
        PipelineMetrics {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            step_retries: self.step_retries.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Reachability of a single dependency, as reported by `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyHealth {
    /// Dependency name, e.g. `"postgres"`, `"redis"`, `"object_store"`.
    pub name: String,
    /// Whether the most recent reachability probe succeeded.
    pub healthy: bool,
    /// Optional detail, populated on failure.
    pub detail: Option<String>,
}

impl DependencyHealth {
    /// A healthy dependency with no detail.
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            detail: None,
        }
    }

    /// An unhealthy dependency with a failure detail.
    pub fn unhealthy(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// Full health report: overall status plus per-dependency detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    /// True only if every dependency is healthy.
    pub healthy: bool,
    /// Per-dependency reachability.
    pub dependencies: Vec<DependencyHealth>,
}

impl HealthReport {
    /// Build a report from individual dependency checks.
    pub fn from_checks(dependencies: Vec<DependencyHealth>) -> Self {
        let healthy = dependencies.iter().all(|d| d.healthy);
        Self {
            healthy,
            dependencies,
        }
    }
}

/// Emit a one-line structured log entry summarizing current metrics.
pub fn log_snapshot(ingest: &IngestMetrics, pipeline: &PipelineMetrics) {
    info!(
        events_received = ingest.events_received,
        events_invalid = ingest.events_invalid,
        events_duplicate = ingest.events_duplicate,
        handler_errors = ingest.handler_errors,
        jobs_submitted = pipeline.jobs_submitted,
        jobs_dropped = pipeline.jobs_dropped,
        jobs_succeeded = pipeline.jobs_succeeded,
        jobs_failed = pipeline.jobs_failed,
        queue_depth = pipeline.queue_depth,
        active_workers = pipeline.active_workers,
        "metrics_snapshot"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_counters_snapshot_reflects_records() {
        let c = IngestCounters::shared();
        c.record_received();
        c.record_received();
        c.record_duplicate();
        c.record_invalid();
        c.record_handler_error();
        let snap = c.snapshot();
        assert_eq!(snap.events_received, 2);
        assert_eq!(snap.events_duplicate, 1);
        assert_eq!(snap.events_invalid, 1);
        assert_eq!(snap.handler_errors, 1);
    }

    #[test]
    fn ingest_counters_track_redeliveries() {
        let c = IngestCounters::shared();
        c.record_retry();
        c.record_retry();
        assert_eq!(c.snapshot().events_redelivered, 2);
    }

    #[test]
    fn pipeline_counters_track_step_retries() {
        let c = PipelineCounters::shared();
        c.record_retry();
        assert_eq!(c.snapshot().step_retries, 1);
    }

    #[test]
    fn pipeline_counters_track_queue_depth_and_workers() {
        let c = PipelineCounters::shared();
        c.record_submitted();
        c.record_submitted();
        c.record_dequeued();
        let snap = c.snapshot();
        assert_eq!(snap.jobs_submitted, 2);
        assert_eq!(snap.queue_depth, 1);
        assert_eq!(snap.active_workers, 1);

        c.record_finished(true);
        let snap = c.snapshot();
        assert_eq!(snap.active_workers, 0);
        assert_eq!(snap.jobs_succeeded, 1);
    }

    #[test]
    fn pipeline_counters_record_dropped_without_touching_depth() {
        let c = PipelineCounters::shared();
        c.record_dropped();
        let snap = c.snapshot();
        assert_eq!(snap.jobs_dropped, 1);
        assert_eq!(snap.queue_depth, 0);
    }

    #[test]
    fn health_report_is_unhealthy_if_any_dependency_fails() {
        let report = HealthReport::from_checks(vec![
            DependencyHealth::ok("postgres"),
            DependencyHealth::unhealthy("redis", "connection refused"),
        ]);
        assert!(!report.healthy);
    }

    #[test]
    fn health_report_is_healthy_when_all_dependencies_pass() {
        let report =
            HealthReport::from_checks(vec![DependencyHealth::ok("postgres"), DependencyHealth::ok("redis")]);
        assert!(report.healthy);
    }
}
