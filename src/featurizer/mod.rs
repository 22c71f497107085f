//! Stage B: a single consumer task that tails the event log, maintains
//! per-user windows, derives features, and publishes snapshots (spec §2,
//! §4.3, §5). Also exposes the tiny `/health`+`/metrics` HTTP surface the
//! original featurizer bolts onto its consumer task.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::eventlog::{EventLog, RedisEventLog};
use crate::features;
use crate::featurestore::{FeatureStore, RedisFeatureStore};
use crate::metrics::{self, FeaturizerMetrics};
use crate::schema::Event;
use crate::window::WindowStore;

/// How many log entries the consumer reads per poll (spec §5).
pub const READ_BATCH_SIZE: usize = 10;

/// Block timeout for `read_after` (spec §5: "1-second block timeout").
pub const READ_BLOCK_MS: u64 = 1_000;

/// Back-off after a read-side failure before retrying with the same
/// cursor (spec §4.3, §7).
pub const READ_FAILURE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct FeaturizerHandles {
    pub event_log: Arc<dyn EventLog>,
    pub feature_store: Arc<dyn FeatureStore>,
    pub metrics: Arc<FeaturizerMetrics>,
}

pub async fn build_handles(config: &Config) -> Result<FeaturizerHandles, AppError> {
    let event_log = RedisEventLog::connect(&config.redis.url(), &config.stream_key).await?;
    let feature_store = RedisFeatureStore::connect(&config.redis.url()).await?;
    Ok(FeaturizerHandles {
        event_log: Arc::new(event_log),
        feature_store: Arc::new(feature_store),
        metrics: Arc::new(FeaturizerMetrics::new()),
    })
}

/// Builds the featurizer's small `/health`+`/metrics` surface. Bolted onto
/// the consumer task the same way the original featurizer's FastAPI app
/// wraps its `asyncio` consumer (`original_source/services/featurizer/app.py`)
/// — the consumer loop itself never touches HTTP.
pub fn router(handles: FeaturizerHandles) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(handles)
}

async fn health(State(handles): State<FeaturizerHandles>) -> Json<Value> {
    match handles.feature_store.read_snapshot("__health_check__").await {
        Ok(_) => Json(json!({ "status": "healthy", "redis": "connected" })),
        Err(e) => Json(json!({ "status": "unhealthy", "redis": "disconnected", "error": e.to_string() })),
    }
}

async fn metrics_handler(State(handles): State<FeaturizerHandles>) -> String {
    metrics::encode(&handles.metrics.registry)
}

/// The featurizer's single consumer loop. There is exactly one caller of
/// this function per process, which is what gives the in-memory
/// `WindowStore` its single-writer, lock-free invariant (spec §5, §9).
pub async fn run(
    handles: FeaturizerHandles,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut windows = WindowStore::new();
    let mut cursor = "0".to_string();

    loop {
        if *shutdown.borrow() {
            info!("featurizer consumer loop shutting down");
            break;
        }

        let read = tokio::select! {
            read = handles.event_log.read_after(&cursor, READ_BATCH_SIZE, READ_BLOCK_MS) => read,
            _ = shutdown.changed() => continue,
        };

        let entries = match read {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "event log read failed, backing off");
                tokio::time::sleep(READ_FAILURE_BACKOFF).await;
                continue;
            }
        };

        for entry in entries {
            cursor = entry.id.clone();

            let event = match Event::from_fields(&entry.fields) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, id = %entry.id, "skipping malformed event (poison-pill isolation)");
                    continue;
                }
            };

            if let Err(e) = process_event(&handles, &mut windows, event).await {
                warn!(error = %e, "feature publication failed, cursor still advances");
            }
        }
    }
}

async fn process_event(
    handles: &FeaturizerHandles,
    windows: &mut WindowStore,
    event: Event,
) -> Result<(), AppError> {
    let now = Utc::now();
    let user_id = event.user_id.clone();
    let event_ts = event.ts;

    let window = windows.get_or_create(&user_id);
    window.insert(event.clone(), now);

    let derived = features::derive(window, &event, now);
    let mut fields = derived.to_fields();

    for (key, value) in event.to_fields() {
        if key.starts_with('V') || key == "Amount_normalized" {
            fields.insert(key, value);
        }
    }
    fields.insert(
        "last_event_ts".to_string(),
        event_ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    );
    fields.insert(
        "last_feature_update_ts".to_string(),
        now.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    );

    let write_timer = handles
        .metrics
        .redis_write_latency_seconds
        .with_label_values(&[])
        .start_timer();
    let write_result = handles.feature_store.write_snapshot(&user_id, &fields).await;
    write_timer.observe_duration();
    write_result?;

    handles.metrics.feature_updates_total.inc();
    let lag = (now - event_ts).num_milliseconds().max(0) as f64 / 1000.0;
    handles
        .metrics
        .feature_freshness_lag_seconds
        .with_label_values(&[])
        .observe(lag);

    debug!(user_id, "published feature snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::InMemoryEventLog;
    use crate::featurestore::InMemoryFeatureStore;
    use crate::schema::sample_event;

    fn handles() -> FeaturizerHandles {
        FeaturizerHandles {
            event_log: Arc::new(InMemoryEventLog::new()),
            feature_store: Arc::new(InMemoryFeatureStore::new()),
            metrics: Arc::new(FeaturizerMetrics::new()),
        }
    }

    async fn read_snapshot(handles: &FeaturizerHandles, user_id: &str) -> std::collections::HashMap<String, String> {
        handles
            .feature_store
            .read_snapshot(user_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// S1 — happy path (spec §8): one event for a fresh user produces the
    /// expected baseline snapshot.
    #[tokio::test]
    async fn s1_happy_path_produces_expected_snapshot() {
        let handles = handles();
        let mut windows = WindowStore::new();
        let now = Utc::now();
        let mut event = sample_event("e1", "u1", 50.0);
        event.ts = now;

        process_event(&handles, &mut windows, event).await.unwrap();

        let fields = read_snapshot(&handles, "u1").await;
        assert_eq!(fields.get("txns_last_5m").unwrap(), "1");
        assert_eq!(fields.get("txns_last_1h").unwrap(), "1");
        assert_eq!(fields.get("txns_last_24h").unwrap(), "1");
        assert_eq!(fields.get("avg_amount_1h").unwrap(), "50.0");
        assert_eq!(fields.get("max_amount_24h").unwrap(), "50.0");
        assert_eq!(fields.get("unique_devices_24h").unwrap(), "1");
        assert_eq!(fields.get("unique_ips_24h").unwrap(), "1");
        assert_eq!(fields.get("amount_zscore").unwrap(), "0.0");
        assert_eq!(fields.get("merchant_velocity_1h").unwrap(), "1");
        assert_eq!(fields.get("device_churn_24h").unwrap(), "0");
        assert_eq!(fields.get("ip_changes_24h").unwrap(), "0");
    }

    /// S2 — velocity (spec §8): six events for one user inside a 10-second
    /// span drive `txns_last_5m` to 6.
    #[tokio::test]
    async fn s2_six_events_in_ten_seconds_yields_txns_last_5m_six() {
        let handles = handles();
        let mut windows = WindowStore::new();
        let now = Utc::now();

        for i in 0..6 {
            let mut event = sample_event(&format!("e{i}"), "u2", 5.0);
            event.ts = now + chrono::Duration::seconds(i);
            process_event(&handles, &mut windows, event).await.unwrap();
        }

        let fields = read_snapshot(&handles, "u2").await;
        assert_eq!(fields.get("txns_last_5m").unwrap(), "6");
    }

    /// S3 — churn (spec §8): devices `d1,d2,d1,d2` yield `device_churn_24h=3`
    /// and `unique_devices_24h=2`.
    #[tokio::test]
    async fn s3_alternating_devices_yield_expected_churn() {
        let handles = handles();
        let mut windows = WindowStore::new();
        let now = Utc::now();

        for (i, device) in ["d1", "d2", "d1", "d2"].iter().enumerate() {
            let mut event = sample_event(&format!("e{i}"), "u3", 5.0);
            event.ts = now + chrono::Duration::seconds(i as i64);
            event.device_id = device.to_string();
            process_event(&handles, &mut windows, event).await.unwrap();
        }

        let fields = read_snapshot(&handles, "u3").await;
        assert_eq!(fields.get("device_churn_24h").unwrap(), "3");
        assert_eq!(fields.get("unique_devices_24h").unwrap(), "2");
    }

    #[tokio::test]
    async fn health_reports_healthy_when_feature_store_reachable() {
        let response = health(State(handles())).await;
        assert_eq!(response.0["status"], json!("healthy"));
    }

    /// Regression test for a cross-stage key-casing mismatch: the
    /// snapshot's `Amount_normalized` field must round-trip through a real
    /// `Event` (`to_fields`/`process_event`) and come back out of
    /// [`crate::inference::assemble_vector`] at the vector's last slot,
    /// rather than silently defaulting to 0.0 because the featurizer wrote
    /// a differently-cased key than inference reads.
    #[tokio::test]
    async fn amount_normalized_survives_process_event_into_assemble_vector() {
        let handles = handles();
        let mut windows = WindowStore::new();
        let mut event = sample_event("e1", "u7", 50.0);
        event.ts = Utc::now();
        event.amount_normalized = 0.87;

        process_event(&handles, &mut windows, event).await.unwrap();

        let fields = read_snapshot(&handles, "u7").await;
        assert_eq!(fields.get("Amount_normalized").unwrap(), "0.87");

        let vector = crate::inference::assemble_vector(&fields);
        assert_eq!(vector[crate::schema::NUM_PCA_FEATURES], 0.87);
    }

    /// Snapshot atomicity (spec §8, property 6): the `last_event_ts` field
    /// always matches the event whose processing produced the rest of the
    /// snapshot, even after a second, different-amount event arrives.
    #[tokio::test]
    async fn snapshot_last_event_ts_matches_the_event_that_produced_it() {
        let handles = handles();
        let mut windows = WindowStore::new();
        let now = Utc::now();

        let mut first = sample_event("e1", "u6", 10.0);
        first.ts = now;
        process_event(&handles, &mut windows, first.clone())
            .await
            .unwrap();
        let after_first = read_snapshot(&handles, "u6").await;
        assert_eq!(
            after_first.get("last_event_ts").unwrap(),
            &first.ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        );
        assert_eq!(after_first.get("avg_amount_1h").unwrap(), "10.0");

        let mut second = sample_event("e2", "u6", 30.0);
        second.ts = now + chrono::Duration::seconds(60);
        process_event(&handles, &mut windows, second.clone())
            .await
            .unwrap();
        let after_second = read_snapshot(&handles, "u6").await;
        assert_eq!(
            after_second.get("last_event_ts").unwrap(),
            &second.ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        );
        assert_eq!(after_second.get("avg_amount_1h").unwrap(), "20.0");
    }
}
