//! The append-only event log transactions are published to and the
//! featurizer consumes from (spec §4.2): a Redis Streams-backed
//! implementation, plus an in-memory double for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::{debug, info};

use crate::errors::AppError;
use crate::schema::Event;

/// Upper bound on stream length; Redis trims the oldest entries once this is
/// exceeded (`XADD ... MAXLEN ~ n`), the same ring-buffer discipline a
/// production stream uses to bound memory.
pub const STREAM_MAXLEN: usize = 10_000;

/// A single entry read back from the log, paired with the id the next read
/// should resume after.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Append-and-tail event log, modeled on Redis Streams semantics.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends an event, returning the id the log assigned it.
    async fn append(&self, event: &Event) -> Result<String, AppError>;

    /// Reads up to `count` entries with an id greater than `after`
    /// (`after = "0"` reads from the start of the stream), blocking for up
    /// to `block_ms` milliseconds if nothing is available yet.
    async fn read_after(
        &self,
        after: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<LogEntry>, AppError>;

    /// Cheap reachability check for `GET /health` (spec §6: "liveness +
    /// infra reachability"), the Rust analog of the original's
    /// `await redis_client.ping()`.
    async fn ping(&self) -> Result<(), AppError>;
}

/// Redis Streams-backed event log.
#[derive(Clone)]
pub struct RedisEventLog {
    conn: ConnectionManager,
    stream_key: String,
}

impl RedisEventLog {
    pub async fn connect(redis_url: &str, stream_key: &str) -> Result<Self, AppError> {
        info!(redis_url, stream_key, "connecting event log to Redis");
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::EventLogUnavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::EventLogUnavailable(format!("redis connect failed: {e}")))?;
        Ok(Self {
            conn,
            stream_key: stream_key.to_string(),
        })
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn append(&self, event: &Event) -> Result<String, AppError> {
        let mut conn = self.conn.clone();
        let fields = event.to_fields();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAXLEN)
            .arg("*");
        for (key, value) in &fields {
            cmd.arg(key).arg(value);
        }

        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::EventLogUnavailable(format!("XADD failed: {e}")))?;
        debug!(id, event_id = %event.event_id, "appended event to stream");
        Ok(id)
    }

    async fn read_after(
        &self,
        after: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<LogEntry>, AppError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(
                &[&self.stream_key],
                &[after],
                &redis::streams::StreamReadOptions::default()
                    .count(count)
                    .block(block_ms as usize),
            )
            .await
            .map_err(|e| AppError::EventLogUnavailable(format!("XREAD failed: {e}")))?;

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                let mut fields = HashMap::with_capacity(id.map.len());
                for (field, value) in id.map {
                    if let redis::Value::BulkString(bytes) = value {
                        if let Ok(s) = String::from_utf8(bytes) {
                            fields.insert(field, s);
                        }
                    }
                }
                entries.push(LogEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::EventLogUnavailable(format!("PING failed: {e}")))?;
        Ok(())
    }
}

/// In-memory event log used by tests and the in-process integration
/// scenarios; preserves insertion order and hands out monotonically
/// increasing string ids the same shape as Redis Streams ids.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    inner: Arc<Mutex<InMemoryInner>>,
}

#[derive(Default)]
struct InMemoryInner {
    entries: Vec<LogEntry>,
    next_seq: u64,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: &Event) -> Result<String, AppError> {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let id = format!("{}-0", inner.next_seq);
        let fields = event.to_fields();
        inner.entries.push(LogEntry {
            id: id.clone(),
            fields,
        });
        Ok(id)
    }

    async fn read_after(
        &self,
        after: &str,
        count: usize,
        _block_ms: u64,
    ) -> Result<Vec<LogEntry>, AppError> {
        let inner = self.inner.lock();
        let after_seq: u64 = if after == "0" {
            0
        } else {
            after
                .split('-')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };

        Ok(inner
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .id
                    .split('-')
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|seq| seq > after_seq)
                    .unwrap_or(false)
            })
            .take(count)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::sample_event;

    #[tokio::test]
    async fn append_then_read_after_returns_new_entries_only() {
        let log = InMemoryEventLog::new();
        let e1 = sample_event("evt-1", "user-1", 10.0);
        let e2 = sample_event("evt-2", "user-1", 20.0);
        let id1 = log.append(&e1).await.unwrap();
        log.append(&e2).await.unwrap();

        let entries = log.read_after(&id1, 10, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields.get("event_id").unwrap(), "evt-2");
    }

    #[tokio::test]
    async fn read_after_zero_returns_everything() {
        let log = InMemoryEventLog::new();
        log.append(&sample_event("evt-1", "user-1", 1.0))
            .await
            .unwrap();
        log.append(&sample_event("evt-2", "user-1", 2.0))
            .await
            .unwrap();

        let entries = log.read_after("0", 10, 0).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn read_after_respects_count() {
        let log = InMemoryEventLog::new();
        for i in 0..5 {
            log.append(&sample_event(&format!("evt-{i}"), "user-1", 1.0))
                .await
                .unwrap();
        }
        let entries = log.read_after("0", 2, 0).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn in_memory_ping_always_succeeds() {
        let log = InMemoryEventLog::new();
        assert!(log.ping().await.is_ok());
    }
}
