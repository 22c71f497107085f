//! `POST /predict`, `GET /features/:user_id`, `GET /health`, `GET /metrics`
//! for the inference process.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::features::{self, ReasonInputs};
use crate::metrics;

use super::{assemble_vector, build_decision, SharedInferenceState};

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub user_id: String,
    pub risk_score: f64,
    pub decision: String,
    pub reasons: Vec<String>,
}

/// Records a failed `/predict` call, mirroring the original's
/// `predict_requests_total.labels(status='error', decision='unknown')`
/// increment on the `except` path (`original_source/services/infer/app.py`)
/// and `src/ingest/handlers.rs::post_event`'s per-outcome label discipline.
fn record_predict_failure(state: &SharedInferenceState) {
    state
        .metrics
        .predict_requests_total
        .with_label_values(&["error", "unknown"])
        .inc();
}

/// Synchronously scores a user (spec §4.4).
pub async fn predict(
    State(state): State<SharedInferenceState>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, AppError> {
    let total_timer = state
        .metrics
        .predict_latency_seconds
        .with_label_values(&[])
        .start_timer();
    let result = predict_inner(&state, request).await;
    total_timer.observe_duration();
    result
}

async fn predict_inner(
    state: &SharedInferenceState,
    request: PredictRequest,
) -> Result<Json<PredictResponse>, AppError> {
    let fetch_timer = state
        .metrics
        .redis_fetch_latency_seconds
        .with_label_values(&[])
        .start_timer();
    let snapshot = state.feature_store.read_snapshot(&request.user_id).await;
    fetch_timer.observe_duration();
    let snapshot = snapshot.inspect_err(|_| record_predict_failure(state))?;

    let (fields, missing) = match snapshot {
        Some(fields) => (fields, false),
        None => (HashMap::new(), true),
    };

    let vector = assemble_vector(&fields);
    let score = state
        .model
        .score(&vector)
        .inspect_err(|_| record_predict_failure(state))?;
    let decision = build_decision(score, state.threshold_allow, state.threshold_block);

    let reasons = if missing {
        vec!["missing_features".to_string()]
    } else {
        features::reason_codes(ReasonInputs::from_snapshot(&fields))
    };

    state
        .metrics
        .predict_requests_total
        .with_label_values(&["success", decision])
        .inc();

    let risk_score = (score as f64 * 10_000.0).round() / 10_000.0;

    Ok(Json(PredictResponse {
        user_id: request.user_id,
        risk_score,
        decision: decision.to_string(),
        reasons,
    }))
}

/// Debug read-through of the feature-store key, coercing numeric-looking
/// values to numbers the way the original debug endpoint does (spec §6).
pub async fn get_features(
    State(state): State<SharedInferenceState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let snapshot = state.feature_store.read_snapshot(&user_id).await?;
    let snapshot = snapshot.ok_or_else(|| {
        AppError::NotFound(format!("No features found for user {user_id}"))
    })?;

    let mut coerced = serde_json::Map::with_capacity(snapshot.len());
    for (key, value) in snapshot {
        let json_value = match value.parse::<f64>() {
            Ok(n) => json!(n),
            Err(_) => json!(value),
        };
        coerced.insert(key, json_value);
    }

    Ok(Json(json!({ "user_id": user_id, "features": coerced })))
}

pub async fn health(State(state): State<SharedInferenceState>) -> Json<Value> {
    match state.feature_store.read_snapshot("__health_check__").await {
        Ok(_) => Json(json!({ "status": "healthy", "redis": "connected", "model": "loaded" })),
        Err(e) => Json(json!({ "status": "unhealthy", "redis": "disconnected", "error": e.to_string() })),
    }
}

pub async fn metrics(State(state): State<SharedInferenceState>) -> String {
    metrics::encode(&state.metrics.registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::featurestore::InMemoryFeatureStore;
    use crate::inference::InferenceState;
    use crate::metrics::InferenceMetrics;
    use crate::model::{ScoringModel, VECTOR_LEN};
    use std::sync::Arc;

    struct ConstantModel(f32);

    impl ScoringModel for ConstantModel {
        fn score(&self, _vector: &[f32; VECTOR_LEN]) -> Result<f32, AppError> {
            Ok(self.0)
        }
    }

    struct FailingModel;

    impl ScoringModel for FailingModel {
        fn score(&self, _vector: &[f32; VECTOR_LEN]) -> Result<f32, AppError> {
            Err(AppError::ModelInvocation("boom".to_string()))
        }
    }

    fn state_with(model_score: f32, store: InMemoryFeatureStore) -> Arc<InferenceState> {
        Arc::new(InferenceState {
            feature_store: Arc::new(store),
            model: Box::new(ConstantModel(model_score)),
            metrics: Arc::new(InferenceMetrics::new()),
            threshold_allow: 0.3,
            threshold_block: 0.7,
        })
    }

    /// S2 — velocity (spec §8): a snapshot reporting `txns_last_5m=6`
    /// scored at or above the block threshold decides `block` and surfaces
    /// `high_velocity_5m`.
    #[tokio::test]
    async fn s2_high_velocity_snapshot_blocks_with_reason() {
        let store = InMemoryFeatureStore::new();
        let mut fields = HashMap::new();
        fields.insert("txns_last_5m".to_string(), "6".to_string());
        fields.insert("txns_last_1h".to_string(), "6".to_string());
        store.write_snapshot("u2", &fields).await.unwrap();

        let state = state_with(0.9, store);
        let response = predict(
            State(state),
            Json(PredictRequest {
                user_id: "u2".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0.decision, "block");
        assert!(response.0.reasons.contains(&"high_velocity_5m".to_string()));
    }

    /// S3 — churn (spec §8): a snapshot reporting `device_churn_24h=3`
    /// scored above the allow threshold surfaces `high_device_churn`.
    #[tokio::test]
    async fn s3_high_churn_snapshot_surfaces_reason_above_allow_threshold() {
        let store = InMemoryFeatureStore::new();
        let mut fields = HashMap::new();
        fields.insert("device_churn_24h".to_string(), "3".to_string());
        store.write_snapshot("u3", &fields).await.unwrap();

        let state = state_with(0.5, store);
        let response = predict(
            State(state),
            Json(PredictRequest {
                user_id: "u3".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0.decision, "step_up");
        assert!(response.0.reasons.contains(&"high_device_churn".to_string()));
    }

    /// S4 — missing user (spec §8): an unknown user still gets a 200 with
    /// an all-zero vector and `reasons=["missing_features"]`.
    #[tokio::test]
    async fn s4_missing_user_returns_missing_features_reason() {
        let store = InMemoryFeatureStore::new();
        let state = state_with(0.42, store);
        let response = predict(
            State(state),
            Json(PredictRequest {
                user_id: "unknown".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0.reasons, vec!["missing_features".to_string()]);
        assert!((response.0.risk_score - 0.42).abs() < 1e-6);
    }

    #[tokio::test]
    async fn get_features_404s_for_unknown_user() {
        let store = InMemoryFeatureStore::new();
        let state = state_with(0.1, store);
        let err = get_features(State(state), Path("ghost".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_features_coerces_numeric_strings() {
        let store = InMemoryFeatureStore::new();
        let mut fields = HashMap::new();
        fields.insert("txns_last_5m".to_string(), "3".to_string());
        fields.insert("currency".to_string(), "USD".to_string());
        store.write_snapshot("u9", &fields).await.unwrap();

        let state = state_with(0.1, store);
        let response = get_features(State(state), Path("u9".to_string()))
            .await
            .unwrap();
        let features = &response.0["features"];
        assert_eq!(features["txns_last_5m"], json!(3.0));
        assert_eq!(features["currency"], json!("USD"));
    }

    /// A model failure must still surface in `predict_requests_total`
    /// (error path parity with `ingest::handlers::post_event`).
    #[tokio::test]
    async fn model_failure_records_error_status_in_metrics() {
        let store = InMemoryFeatureStore::new();
        let state = Arc::new(InferenceState {
            feature_store: Arc::new(store),
            model: Box::new(FailingModel),
            metrics: Arc::new(InferenceMetrics::new()),
            threshold_allow: 0.3,
            threshold_block: 0.7,
        });

        let err = predict(
            State(state.clone()),
            Json(PredictRequest {
                user_id: "u1".to_string(),
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::ModelInvocation(_)));
        let text = metrics::encode(&state.metrics.registry);
        assert!(text.contains(r#"predict_requests_total{decision="unknown",status="error"}"#));
    }
}
