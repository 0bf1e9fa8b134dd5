//! Metrics collection for the relay
//!
//! This module defines and manages Prometheus metrics for monitoring forward runs.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

use crate::services::forward::Flavor;

lazy_static! {
    // HTTP Request Metrics

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL");

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "relay_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");

    /// In-flight HTTP requests
    pub static ref HTTP_REQUESTS_IN_FLIGHT: IntGaugeVec = register_int_gauge_vec!(
        "relay_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
        &["method", "path"]
    )
    .expect("Failed to register HTTP_REQUESTS_IN_FLIGHT");

    // Forwarding Metrics

    /// Forward runs by flavor and outcome (ok, partial, failed)
    pub static ref FORWARD_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_forward_runs_total",
        "Total number of forward runs",
        &["flavor", "outcome"]
    )
    .expect("Failed to register FORWARD_RUNS_TOTAL");

    /// Forward run duration
    pub static ref FORWARD_RUN_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "relay_forward_run_duration_seconds",
        "Forward run duration in seconds",
        &["flavor"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("Failed to register FORWARD_RUN_DURATION_SECONDS");

    /// Destination uploads by resource type and outcome
    pub static ref UPLOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_uploads_total",
        "Total number of destination uploads",
        &["resource_type", "outcome"]
    )
    .expect("Failed to register UPLOADS_TOTAL");

    /// Retries triggered by a missing-dependency diagnostic or a transient failure
    pub static ref UPLOAD_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_upload_retries_total",
        "Total number of upload retries",
        &["reason", "outcome"]
    )
    .expect("Failed to register UPLOAD_RETRIES_TOTAL");

    /// Source reads by source and outcome (found, not_found, error)
    pub static ref SOURCE_FETCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_source_fetches_total",
        "Total number of source reads",
        &["source", "outcome"]
    )
    .expect("Failed to register SOURCE_FETCHES_TOTAL");

    /// Terminology notifications by outcome
    pub static ref TERMINOLOGY_NOTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_terminology_notifications_total",
        "Total number of terminology validation notifications",
        &["outcome"]
    )
    .expect("Failed to register TERMINOLOGY_NOTIFICATIONS_TOTAL");
}

/// Helper to sanitize path for metrics labels (limit cardinality)
pub fn sanitize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => "/".to_string(),
        ["forwarder", "_event"] => "/forwarder/_event".to_string(),
        ["forwarder", flavor, "_event"] => match extract_flavor(path) {
            Some(_) => format!("/forwarder/{flavor}/_event"),
            None => "/forwarder/{flavor}/_event".to_string(),
        },
        [first, ..] => format!("/{first}"),
    }
}

/// Forward flavor named by a trigger path, if any
pub fn extract_flavor(path: &str) -> Option<Flavor> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["forwarder", "_event"] => Some(Flavor::Encounter),
        ["forwarder", flavor, "_event"] => flavor.parse().ok(),
        _ => None,
    }
}
