//! Bounded worker pool driving [`crate::run_session_pipeline`] (spec §4.F,
//! §5). Submitters call [`Pipeline::enqueue_session`]; if the queue is
//! full, the submission is dropped and logged rather than blocking the
//! caller — a losing race re-enqueues from the other trigger source (the
//! transcript-upload route or the `session.end` handler).

use crate::{run_session_pipeline_counted, PipelineContext};
use devpulse_config::PipelineConfig;
use devpulse_telemetry::PipelineCounters;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// A running pool of pipeline workers pulling session ids off a bounded
/// queue. Dropping the last [`Pipeline::enqueue_session`] sender (via
/// [`Pipeline::shutdown`]) lets every worker drain its current job and
/// exit once the queue empties.
pub struct Pipeline {
    tx: mpsc::Sender<String>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<PipelineCounters>,
}

/// A cheap, cloneable handle for submitting work to a running [`Pipeline`],
/// with no access to the worker handles needed for shutdown. This is what
/// route handlers and the log-consumer loop hold; the owning binary keeps
/// the [`Pipeline`] itself so it alone can call [`Pipeline::shutdown`].
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<String>,
    metrics: Arc<PipelineCounters>,
}

impl PipelineHandle {
    /// Submit a session id for processing. Same semantics as
    /// [`Pipeline::enqueue_session`].
    pub fn enqueue_session(&self, session_id: impl Into<String>) -> bool {
        match self.tx.try_send(session_id.into()) {
            Ok(()) => {
                self.metrics.record_submitted();
                true
            }
            Err(_) => {
                self.metrics.record_dropped();
                false
            }
        }
    }
}

impl Pipeline {
    /// Spawn `config.max_concurrency` workers sharing a single bounded
    /// queue of capacity `config.queue_capacity`.
    pub fn spawn(context: PipelineContext, config: &PipelineConfig, metrics: Arc<PipelineCounters>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.max_concurrency.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let ctx = context.clone();
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(session_id) = next else {
                            tracing::debug!(worker_id, "pipeline worker exiting, queue closed");
                            break;
                        };
                        run_session_pipeline_counted(&ctx, &session_id, &metrics).await;
                    }
                })
            })
            .collect();

        Self { tx, workers, metrics }
    }

    /// Submit a session id for processing. Returns `false` (and bumps the
    /// dropped-job counter) if the queue is full; the caller only logs,
    /// per spec §4.F — a subsequent trigger recovers.
    pub fn enqueue_session(&self, session_id: impl Into<String>) -> bool {
        match self.tx.try_send(session_id.into()) {
            Ok(()) => {
                self.metrics.record_submitted();
                true
            }
            Err(_) => {
                self.metrics.record_dropped();
                false
            }
        }
    }

    /// A cloneable submission handle, independent of the worker handles this
    /// pool owns. Hand this to anything that only needs to enqueue work.
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            tx: self.tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Stop accepting new work and wait for every in-flight job to finish
    /// (spec §5's shutdown ordering: "stop pipeline workers, wait for
    /// current jobs"). Consumes the pool; callers hold no other handle to
    /// the queue once this returns.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devpulse_telemetry::PipelineCounters;

    #[test]
    fn enqueue_beyond_capacity_is_dropped_not_blocking() {
        // A queue of capacity zero means the very first try_send has no
        // buffer slot and fails immediately whenever no worker is polling.
        let (tx, _rx) = mpsc::channel::<String>(1);
        let metrics = PipelineCounters::shared();
        let pool = Pipeline {
            tx,
            workers: vec![],
            metrics: metrics.clone(),
        };
        assert!(pool.enqueue_session("S1"));
        assert!(!pool.enqueue_session("S2"));
        let snap = metrics.snapshot();
        assert_eq!(snap.jobs_submitted, 1);
        assert_eq!(snap.jobs_dropped, 1);
    }
}
