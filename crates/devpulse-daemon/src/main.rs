#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use devpulse_daemon::{consumer::run_consumer, AppState, CONSUMER_GROUP};
use devpulse_eventlog::EventLog;
use devpulse_objectstore::ObjectStore;
use devpulse_pipeline::{Pipeline, PipelineContext};
use devpulse_store::Store;
use devpulse_summary::SummaryClient;
use devpulse_telemetry::{IngestCounters, PipelineCounters};
use devpulse_ws::{Broadcaster, WsState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use ulid::Ulid;

/// Stream key the durable log is bound to.
const STREAM_KEY: &str = "devpulse:events";

#[derive(Parser, Debug)]
#[command(name = "devpulse-daemon", version, about = "devpulse ingest, processing, and dashboard daemon")]
struct Args {
    /// Bind address for the HTTP/WebSocket server.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Path to the TOML config file (spec §6).
    #[arg(long, default_value = "devpulse.toml")]
    config: PathBuf,

    /// Widen logging to debug level.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = devpulse_config::load_config(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    let warnings = devpulse_config::validate_config(&config).context("validate config")?;

    devpulse_telemetry::init_tracing(args.debug);
    for warning in &warnings {
        warn!(%warning, "config warning");
    }

    let store = Store::connect(&config.database_url).await.context("connect to postgres")?;

    let event_log = EventLog::connect(&config.redis_url, STREAM_KEY)
        .await
        .map_err(|e| anyhow::anyhow!("connect to event log: {e}"))?;
    event_log
        .ensure_group(CONSUMER_GROUP)
        .await
        .map_err(|e| anyhow::anyhow!("ensure consumer group: {e}"))?;

    let objects = ObjectStore::connect(&config.s3).await;
    let summary = SummaryClient::new(config.summary.base_url.clone(), config.summary.clone());
    let broadcaster = Broadcaster::new();
    let ws_state = WsState::new(broadcaster.clone(), config.api_key.clone(), config.ws.clone());

    let pipeline_context = PipelineContext::new(store.clone(), objects.clone(), summary, broadcaster.clone());
    let pipeline_metrics = PipelineCounters::shared();
    let pipeline = Pipeline::spawn(pipeline_context, &config.pipeline, pipeline_metrics);
    let pipeline_handle = pipeline.handle();

    let ingest_metrics = IngestCounters::shared();

    let state = Arc::new(AppState {
        store: store.clone(),
        event_log: event_log.clone(),
        objects,
        pipeline: pipeline_handle.clone(),
        ws: ws_state.clone(),
        api_key: Arc::from(config.api_key.as_str()),
        ingest_metrics: ingest_metrics.clone(),
    });
    let app = devpulse_daemon::build_app(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_name = format!("devpulse-daemon-{}", Ulid::new());
    let consumer_handle = tokio::spawn(run_consumer(
        event_log,
        store,
        ingest_metrics,
        ws_state,
        pipeline_handle,
        CONSUMER_GROUP.to_string(),
        consumer_name,
        shutdown_rx,
    ));

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "devpulse-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    // Spec §5's shutdown ordering: stop the consumer, then drain and close
    // the pipeline's worker pool, before the process exits and drops every
    // remaining dependency handle.
    let _ = shutdown_tx.send(true);
    let _ = consumer_handle.await;
    pipeline.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
