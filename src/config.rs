// Configuration for the fraud-risk pipeline
//
// Every process reads configuration from the environment: env vars are the
// only configuration surface, there is no config file. All three binaries
// build the same `Config` and use only the fields relevant to them, each
// threading it through its own background tasks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Redis connection settings, shared by the event log and feature store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env_or("REDIS_HOST", "localhost"),
            port: env_parse("REDIS_PORT", 6379u16)?,
        })
    }
}

/// Columnar writer flush policy and blob base path (spec §4.1, §6).
#[derive(Debug, Clone)]
pub struct ColumnarConfig {
    pub base_path: PathBuf,
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl ColumnarConfig {
    fn from_env() -> Result<Self> {
        let flush_interval_secs: u64 = env_parse("FLUSH_INTERVAL", 10u64)?;
        Ok(Self {
            base_path: PathBuf::from(env_or("S3_BUCKET", "./data/local-s3")),
            flush_interval: Duration::from_secs(flush_interval_secs),
            batch_size: env_parse("BATCH_SIZE", 100usize)?,
        })
    }
}

/// Inference thresholds and model location (spec §4.4, §6).
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub threshold_allow: f32,
    pub threshold_block: f32,
}

impl ModelConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            model_path: PathBuf::from(env_or("MODEL_PATH", "./data/model.json")),
            threshold_allow: env_parse("THRESHOLD_ALLOW", 0.3f32)?,
            threshold_block: env_parse("THRESHOLD_BLOCK", 0.7f32)?,
        })
    }
}

/// Full process configuration. Each binary only reads the fields it needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub stream_key: String,
    pub columnar: ColumnarConfig,
    pub model: ModelConfig,
    pub ingest_bind_addr: SocketAddr,
    pub inference_bind_addr: SocketAddr,
    pub featurizer_bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis: RedisConfig::from_env()?,
            stream_key: env_or("STREAM_KEY", "transaction_events"),
            columnar: ColumnarConfig::from_env()?,
            model: ModelConfig::from_env()?,
            ingest_bind_addr: env_or("INGEST_BIND_ADDR", "0.0.0.0:8000")
                .parse()
                .context("invalid INGEST_BIND_ADDR")?,
            inference_bind_addr: env_or("INFERENCE_BIND_ADDR", "0.0.0.0:8001")
                .parse()
                .context("invalid INFERENCE_BIND_ADDR")?,
            featurizer_bind_addr: env_or("FEATURIZER_BIND_ADDR", "0.0.0.0:8002")
                .parse()
                .context("invalid FEATURIZER_BIND_ADDR")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_formats_host_and_port() {
        let cfg = RedisConfig {
            host: "cache".to_string(),
            port: 6380,
        };
        assert_eq!(cfg.url(), "redis://cache:6380");
    }

    #[test]
    fn env_parse_falls_back_to_default_when_unset() {
        std::env::remove_var("FRAUDPIPE_TEST_KEY_ABSENT");
        let value: u64 = env_parse("FRAUDPIPE_TEST_KEY_ABSENT", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn env_parse_rejects_malformed_values() {
        std::env::set_var("FRAUDPIPE_TEST_KEY_BAD", "not-a-number");
        let result: Result<u64> = env_parse("FRAUDPIPE_TEST_KEY_BAD", 0);
        assert!(result.is_err());
        std::env::remove_var("FRAUDPIPE_TEST_KEY_BAD");
    }
}
