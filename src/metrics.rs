//! Observability counters and histograms (spec §6). The metric names are a
//! fixed contract; this module only supplies the sink — an external
//! scraper is the "external collaborator" spec §1 calls out as out of
//! scope.

use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};

/// Ingest-process metrics.
pub struct IngestMetrics {
    pub registry: Registry,
    pub events_total: IntCounterVec,
    pub flushes_total: IntCounter,
    pub buffer_size: IntGauge,
    pub flush_latency_seconds: HistogramVec,
}

impl IngestMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            prometheus::Opts::new("ingest_events_total", "Total events received by status"),
            &["status"],
        )
        .expect("valid metric definition");

        let flushes_total = IntCounter::new(
            "ingest_flushes_total",
            "Total number of columnar buffer flushes",
        )
        .expect("valid metric definition");

        let buffer_size = IntGauge::new(
            "ingest_buffer_size",
            "Current number of events buffered in the columnar writer",
        )
        .expect("valid metric definition");

        let flush_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "ingest_flush_latency_seconds",
                "Time to write one columnar blob",
            ),
            &[],
        )
        .expect("valid metric definition");

        registry
            .register(Box::new(events_total.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(flushes_total.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(buffer_size.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(flush_latency_seconds.clone()))
            .expect("unique metric name");

        Self {
            registry,
            events_total,
            flushes_total,
            buffer_size,
            flush_latency_seconds,
        }
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Featurizer-process metrics.
pub struct FeaturizerMetrics {
    pub registry: Registry,
    pub feature_updates_total: IntCounter,
    pub feature_freshness_lag_seconds: HistogramVec,
    pub redis_write_latency_seconds: HistogramVec,
}

impl FeaturizerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let feature_updates_total = IntCounter::new(
            "feature_updates_total",
            "Total per-user feature snapshot writes",
        )
        .expect("valid metric definition");

        let feature_freshness_lag_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "feature_freshness_lag_seconds",
                "Wall-clock minus event timestamp at the moment of publish",
            ),
            &[],
        )
        .expect("valid metric definition");

        let redis_write_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "redis_write_latency_seconds",
                "Feature-store write latency",
            ),
            &[],
        )
        .expect("valid metric definition");

        registry
            .register(Box::new(feature_updates_total.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(feature_freshness_lag_seconds.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(redis_write_latency_seconds.clone()))
            .expect("unique metric name");

        Self {
            registry,
            feature_updates_total,
            feature_freshness_lag_seconds,
            redis_write_latency_seconds,
        }
    }
}

impl Default for FeaturizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Inference-process metrics.
pub struct InferenceMetrics {
    pub registry: Registry,
    pub predict_requests_total: IntCounterVec,
    pub predict_latency_seconds: HistogramVec,
    pub redis_fetch_latency_seconds: HistogramVec,
}

impl InferenceMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let predict_requests_total = IntCounterVec::new(
            prometheus::Opts::new(
                "predict_requests_total",
                "Total /predict calls by status and decision",
            ),
            &["status", "decision"],
        )
        .expect("valid metric definition");

        let predict_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("predict_latency_seconds", "End-to-end /predict latency"),
            &[],
        )
        .expect("valid metric definition");

        let redis_fetch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "redis_fetch_latency_seconds",
                "Feature-store read latency",
            ),
            &[],
        )
        .expect("valid metric definition");

        registry
            .register(Box::new(predict_requests_total.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(predict_latency_seconds.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(redis_fetch_latency_seconds.clone()))
            .expect("unique metric name");

        Self {
            registry,
            predict_requests_total,
            predict_latency_seconds,
            redis_fetch_latency_seconds,
        }
    }
}

impl Default for InferenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a registry's current metric families as Prometheus text
/// exposition format, for the `GET /metrics` handlers.
pub fn encode(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let families = registry.gather();
    let mut buf = Vec::new();
    encoder
        .encode(&families, &mut buf)
        .expect("prometheus text encoding never fails for valid metric families");
    String::from_utf8(buf).expect("prometheus text encoder emits valid utf8")
}
