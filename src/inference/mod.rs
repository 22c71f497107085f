//! Stage C: synchronously turns a `user_id` into a risk decision (spec §2,
//! §4.4, §4.5, §6).

mod handlers;
mod vector;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::errors::AppError;
use crate::featurestore::{FeatureStore, RedisFeatureStore};
use crate::metrics::InferenceMetrics;
use crate::model::ScoringModel;

pub use vector::{assemble_vector, build_decision};

/// Shared state every inference handler reads from.
pub struct InferenceState {
    pub feature_store: Arc<dyn FeatureStore>,
    pub model: Box<dyn ScoringModel>,
    pub metrics: Arc<InferenceMetrics>,
    pub threshold_allow: f32,
    pub threshold_block: f32,
}

pub type SharedInferenceState = Arc<InferenceState>;

pub fn router(state: SharedInferenceState) -> Router {
    Router::new()
        .route("/predict", post(handlers::predict))
        .route("/features/:user_id", get(handlers::get_features))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn build_state(config: &Config) -> Result<SharedInferenceState, AppError> {
    let feature_store = RedisFeatureStore::connect(&config.redis.url()).await?;
    let model = crate::model::load_model(&config.model.model_path)?;

    Ok(Arc::new(InferenceState {
        feature_store: Arc::new(feature_store),
        model,
        metrics: Arc::new(InferenceMetrics::new()),
        threshold_allow: config.model.threshold_allow,
        threshold_block: config.model.threshold_block,
    }))
}
