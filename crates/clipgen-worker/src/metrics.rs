//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use clipgen_models::{JobKind, MomentSource};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "clipgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "clipgen_jobs_failed_total";
    pub const JOB_RETRIES_TOTAL: &str = "clipgen_job_retries_total";
    pub const CLIPS_RENDERED_TOTAL: &str = "clipgen_clips_rendered_total";
    pub const RENDER_DURATION_SECONDS: &str = "clipgen_render_duration_seconds";
    pub const TRANSCRIPT_CACHE_HITS_TOTAL: &str = "clipgen_transcript_cache_hits_total";
    pub const SELECTION_TOTAL: &str = "clipgen_selection_total";
}

/// Install the Prometheus HTTP listener when `METRICS_PORT` is set.
///
/// Without a recorder the `metrics` macros are no-ops.
pub fn init_metrics_from_env() {
    let Some(port) = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|p| p.trim().parse::<u16>().ok())
    else {
        return;
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening"),
        Err(e) => warn!(error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_job_completed(kind: JobKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(kind: JobKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_retry(kind: JobKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOB_RETRIES_TOTAL, &labels).increment(1);
}

/// Record one finished render, `success` or `failure`.
pub fn record_clip_rendered(success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    let labels = [("outcome", outcome.to_string())];
    counter!(names::CLIPS_RENDERED_TOTAL, &labels).increment(1);
    histogram!(names::RENDER_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_transcript_cache_hit() {
    counter!(names::TRANSCRIPT_CACHE_HITS_TOTAL).increment(1);
}

pub fn record_selection(method: MomentSource) {
    let labels = [("method", method.as_str().to_string())];
    counter!(names::SELECTION_TOTAL, &labels).increment(1);
}
