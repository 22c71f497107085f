//! Stage A: accepts transaction events over HTTP, buffers them for the
//! columnar sink, and republishes each onto the event log (spec §2, §4.1,
//! §6).

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::columnar::ColumnarWriter;
use crate::config::Config;
use crate::errors::AppError;
use crate::eventlog::{EventLog, RedisEventLog};
use crate::metrics::IngestMetrics;

/// Shared state every ingest handler reads from.
pub struct IngestState {
    pub writer: Arc<ColumnarWriter>,
    pub event_log: Arc<dyn EventLog>,
    pub metrics: Arc<IngestMetrics>,
}

pub type SharedIngestState = Arc<IngestState>;

/// Builds the ingest router: `POST /events`, `GET /health`, `GET /metrics`.
pub fn router(state: SharedIngestState) -> Router {
    Router::new()
        .route("/events", post(handlers::post_event))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connects to infra and assembles the shared state for the ingest
/// process.
pub async fn build_state(config: &Config) -> Result<SharedIngestState, AppError> {
    let event_log = RedisEventLog::connect(&config.redis.url(), &config.stream_key).await?;
    let writer = ColumnarWriter::new(config.columnar.base_path.clone(), config.columnar.batch_size);

    Ok(Arc::new(IngestState {
        writer: Arc::new(writer),
        event_log: Arc::new(event_log),
        metrics: Arc::new(IngestMetrics::new()),
    }))
}

/// Background task driving the time-based flush trigger (spec §5: "One
/// background task drives time-based flushes").
pub async fn run_periodic_flush(
    state: SharedIngestState,
    flush_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if state.writer.size() > 0 {
                    if let Err(e) = flush_and_record(&state).await {
                        warn!(error = %e, "periodic flush failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("periodic flush task shutting down");
                break;
            }
        }
    }
}

pub async fn flush_and_record(state: &IngestState) -> Result<(), AppError> {
    let timer = state.metrics.flush_latency_seconds.with_label_values(&[]).start_timer();
    let outcome = state.writer.flush().await;
    timer.observe_duration();

    match outcome {
        Ok(result) => {
            if result.events_written > 0 {
                state.metrics.flushes_total.inc();
            }
            state.metrics.buffer_size.set(state.writer.size() as i64);
            Ok(())
        }
        Err(e) => {
            state.metrics.buffer_size.set(state.writer.size() as i64);
            Err(e)
        }
    }
}
