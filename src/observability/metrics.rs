use anyhow::Result;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use tracing::{error, info};

// Declare the static OnceLock to hold the Metrics.
static METRICS_INSTANCE: OnceLock<Option<Metrics>> = OnceLock::new();

/// Gets the process-wide metrics, registering them on first use.
///
/// Registration failures are logged once and metrics are disabled afterwards.
pub fn get_metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE
        .get_or_init(|| {
            info!("Initializing Metrics ...");
            Metrics::new()
                .inspect_err(|e| error!("metrics registration failed: {}", e))
                .ok()
        })
        .as_ref()
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Cache metrics
    pub cache_hits: IntCounterVec,
    pub cache_misses: IntCounterVec,
    pub cache_flight_joins: IntCounterVec,
    pub cache_evictions: IntCounterVec,

    // Load metrics
    pub loads: IntCounterVec,
    pub load_failures: IntCounterVec,
    pub load_duration: HistogramVec,
}

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("tokencache".into()), None)?;

        let metrics = Self {
            cache_hits: IntCounterVec::new(Opts::new("cache_hits_total", "Lookups served from the cache"), &["cache"])?,
            cache_misses: IntCounterVec::new(Opts::new("cache_misses_total", "Lookups that required a load"), &["cache"])?,
            cache_flight_joins: IntCounterVec::new(Opts::new("cache_flight_joins_total", "Callers that waited on a load started by another caller"), &["cache"])?,
            cache_evictions: IntCounterVec::new(Opts::new("cache_evictions_total", "Entries evicted by capacity pressure"), &["cache"])?,

            loads: IntCounterVec::new(Opts::new("loads_total", "Loads (mints, fetches) started"), &["cache"])?,
            load_failures: IntCounterVec::new(Opts::new("load_failures_total", "Failed loads by kind"), &["cache", "kind"])?,
            load_duration: HistogramVec::new(HistogramOpts::new("load_duration_seconds", "Load duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]), &["cache"])?,

            registry,
        };

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.cache_hits.clone()))?;
        reg.register(Box::new(metrics.cache_misses.clone()))?;
        reg.register(Box::new(metrics.cache_flight_joins.clone()))?;
        reg.register(Box::new(metrics.cache_evictions.clone()))?;
        reg.register(Box::new(metrics.loads.clone()))?;
        reg.register(Box::new(metrics.load_failures.clone()))?;
        reg.register(Box::new(metrics.load_duration.clone()))?;

        Ok(metrics)
    }
}

pub fn record_hit(cache: &str) {
    if let Some(metrics) = get_metrics() {
        metrics.cache_hits.with_label_values(&[cache]).inc();
    }
}

pub fn record_miss(cache: &str) {
    if let Some(metrics) = get_metrics() {
        metrics.cache_misses.with_label_values(&[cache]).inc();
    }
}

pub fn record_flight_join(cache: &str) {
    if let Some(metrics) = get_metrics() {
        metrics.cache_flight_joins.with_label_values(&[cache]).inc();
    }
}

pub fn record_eviction(cache: &str) {
    if let Some(metrics) = get_metrics() {
        metrics.cache_evictions.with_label_values(&[cache]).inc();
    }
}

pub fn record_load(cache: &str, elapsed_secs: f64, failure_kind: Option<&str>) {
    if let Some(metrics) = get_metrics() {
        metrics.loads.with_label_values(&[cache]).inc();
        metrics.load_duration.with_label_values(&[cache]).observe(elapsed_secs);
        if let Some(kind) = failure_kind {
            metrics.load_failures.with_label_values(&[cache, kind]).inc();
        }
    }
}

/// Text exposition of every registered metric.
pub fn gather_text() -> Result<String> {
    let Some(metrics) = get_metrics() else {
        return Ok(String::new());
    };
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metrics.registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
