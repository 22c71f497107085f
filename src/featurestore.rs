//! The per-user feature snapshot store the featurizer writes to and
//! inference reads from (spec §4.3, §4.4): a Redis hash-backed
//! implementation with a per-key TTL, plus an in-memory double for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::debug;

use crate::errors::AppError;

/// How long a user's feature snapshot survives without a refresh (spec §4.3).
pub const SNAPSHOT_TTL_SECS: u64 = 48 * 3600;

fn feature_key(user_id: &str) -> String {
    format!("features:user:{user_id}")
}

/// Per-user feature snapshot persistence. A write replaces every field in
/// one shot ("last writer wins" — there is exactly one writer, the
/// featurizer, so no read-modify-write race exists). A miss on read is not
/// an error: the caller falls back to the default all-zero feature set.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn write_snapshot(
        &self,
        user_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), AppError>;

    async fn read_snapshot(&self, user_id: &str) -> Result<Option<HashMap<String, String>>, AppError>;
}

/// Redis hash-backed feature store.
#[derive(Clone)]
pub struct RedisFeatureStore {
    conn: ConnectionManager,
}

impl RedisFeatureStore {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::FeatureStoreUnavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::FeatureStoreUnavailable(format!("redis connect failed: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl FeatureStore for RedisFeatureStore {
    async fn write_snapshot(
        &self,
        user_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let key = feature_key(user_id);

        let pairs: Vec<(&String, &String)> = fields.iter().collect();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("HSET").arg(&key).arg(pairs).ignore();
        pipe.cmd("EXPIRE").arg(&key).arg(SNAPSHOT_TTL_SECS).ignore();

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| AppError::FeatureStoreUnavailable(format!("HSET/EXPIRE failed: {e}")))?;
        debug!(user_id, "wrote feature snapshot");
        Ok(())
    }

    async fn read_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<HashMap<String, String>>, AppError> {
        let mut conn = self.conn.clone();
        let key = feature_key(user_id);
        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| AppError::FeatureStoreUnavailable(format!("HGETALL failed: {e}")))?;
        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields))
        }
    }
}

/// In-memory feature store used by tests; snapshot overwrite semantics
/// match the Redis implementation but there is no TTL expiry.
#[derive(Clone, Default)]
pub struct InMemoryFeatureStore {
    inner: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeatureStore for InMemoryFeatureStore {
    async fn write_snapshot(
        &self,
        user_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), AppError> {
        self.inner
            .lock()
            .insert(user_id.to_string(), fields.clone());
        Ok(())
    }

    async fn read_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<HashMap<String, String>>, AppError> {
        Ok(self.inner.lock().get(user_id).cloned())
    }
}
