//! Metrics
//!
//! Prometheus counters and histograms for the namenode, recorded through the
//! `metrics` facade and scraped from `GET /metrics`.

use ::metrics::{Unit, describe_counter, describe_histogram};
use axum::{
    Extension,
    http::{StatusCode, header},
    response::IntoResponse,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub const ENDPOINT_METRICS: &str = "/metrics";

pub const API_REQUESTS: &str = "radix_store.api.requests";
pub const API_LATENCY: &str = "radix_store.api.latency";
pub const LOCK_WAIT: &str = "radix_store.lock.wait";
pub const LOCK_TIMEOUTS: &str = "radix_store.lock.timeouts";
pub const LOCK_OWNERSHIP_LOST: &str = "radix_store.lock.ownership_lost";
pub const INDEX_RESTARTS: &str = "radix_store.index.restarts";

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if ::metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("A metrics recorder was already installed");
            }
            describe();
            handle
        })
        .clone()
}

fn describe() {
    describe_counter!(API_REQUESTS, "Object API requests by operation and status");
    describe_histogram!(API_LATENCY, Unit::Seconds, "Object API latency by operation");
    describe_histogram!(LOCK_WAIT, Unit::Seconds, "Time spent acquiring a lock, by mode");
    describe_counter!(LOCK_TIMEOUTS, "Lock acquisitions that hit their deadline");
    describe_counter!(LOCK_OWNERSHIP_LOST, "Unlocks that found their lease lapsed");
    describe_counter!(INDEX_RESTARTS, "Trie operations restarted after a concurrent restructure");
}

/// Prometheus text exposition of every recorded metric.
pub async fn handle_metrics(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    handle.run_upkeep();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
