//! Prometheus metrics for the ferry workers.
//!
//! Served on `/metrics` by the ops endpoint when `ops.bind` is set. Labels
//! never carry owner groups or item ids.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use ferry_queue::{ConsumerObserver, Disposition};
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};
use std::time::Duration;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static MESSAGES_HANDLED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_messages_handled_total",
            "Messages settled by each worker",
        ),
        &["handler", "disposition"],
    )
    .expect("metric creation failed")
});

pub static HANDLER_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ferry_handler_duration_seconds",
            "Time from delivery to settlement",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["handler"],
    )
    .expect("metric creation failed")
});

pub static CONSUMER_RECONNECTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_consumer_reconnects_total",
            "Broker subscriptions re-established after a dropped connection",
        ),
        &["handler"],
    )
    .expect("metric creation failed")
});

pub static CREDENTIAL_LEASE_MISSES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_credential_lease_misses_total",
            "Lease attempts that found no usable credential",
        ),
        &["key"],
    )
    .expect("metric creation failed")
});

pub static EXTRACTION_JOBS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_extraction_jobs_total",
            "Extraction jobs by final status",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static ITEMS_DISCOVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ferry_items_discovered_total",
        "Leaf items discovered by the tree extractor",
    )
    .expect("metric creation failed")
});

pub static CASCADE_PUBLISH_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ferry_cascade_publish_failures_total",
        "Recheck requests that could not be published after a revocation",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Idempotent.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(MESSAGES_HANDLED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HANDLER_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CONSUMER_RECONNECTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CREDENTIAL_LEASE_MISSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EXTRACTION_JOBS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ITEMS_DISCOVERED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CASCADE_PUBLISH_FAILURES.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Feeds consumer settlements into the registry.
pub struct PrometheusObserver;

impl ConsumerObserver for PrometheusObserver {
    fn settled(&self, handler: &'static str, disposition: Disposition, elapsed: Duration) {
        MESSAGES_HANDLED
            .with_label_values(&[handler, disposition.as_str()])
            .inc();
        HANDLER_DURATION
            .with_label_values(&[handler])
            .observe(elapsed.as_secs_f64());
    }

    fn reconnected(&self, handler: &'static str) {
        CONSUMER_RECONNECTS.with_label_values(&[handler]).inc();
    }
}
