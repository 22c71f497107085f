//! `POST /events`, `GET /health`, `GET /metrics` for the ingest process.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::errors::AppError;
use crate::metrics;
use crate::schema::{Event, EventPayload};

use super::{flush_and_record, SharedIngestState};

/// Accepts one transaction event: validate, buffer for the columnar sink,
/// publish to the event log, respond (spec §4.2, §6).
pub async fn post_event(
    State(state): State<SharedIngestState>,
    Json(payload): Json<EventPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    let event: Event = payload.into();
    if let Err(e) = event.validate() {
        state.metrics.events_total.with_label_values(&["rejected"]).inc();
        return Err(e);
    }

    let should_flush = state.writer.enqueue(event.clone());
    state.metrics.buffer_size.set(state.writer.size() as i64);

    if should_flush {
        // Fire-and-forget: the handler must not await the flush (spec §5).
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = flush_and_record(&state).await {
                tracing::warn!(error = %e, "size-triggered flush failed");
            }
        });
    }

    let log_result = state.event_log.append(&event).await;
    match log_result {
        Ok(_) => {
            state.metrics.events_total.with_label_values(&["ok"]).inc();
            Ok(Json(json!({ "status": "ok", "event_id": event.event_id })))
        }
        Err(e) => {
            state.metrics.events_total.with_label_values(&["error"]).inc();
            Err(e)
        }
    }
}

/// Liveness and infra reachability (spec §6), mirroring the original's
/// `await redis_client.ping()` health check.
pub async fn health(State(state): State<SharedIngestState>) -> Json<serde_json::Value> {
    let buffer_size = state.writer.size();
    match state.event_log.ping().await {
        Ok(()) => Json(json!({ "status": "healthy", "redis": "connected", "buffer_size": buffer_size })),
        Err(e) => Json(json!({
            "status": "unhealthy",
            "redis": "disconnected",
            "error": e.to_string(),
            "buffer_size": buffer_size
        })),
    }
}

pub async fn metrics(State(state): State<SharedIngestState>) -> String {
    metrics::encode(&state.metrics.registry)
}
