//! Metrics module
//!
//! Prometheus counters for one upload run. There is no scrape endpoint; the
//! binary can dump the registry in text exposition format with
//! [`write_textfile`] for a node-exporter textfile collector.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Histogram,
    TextEncoder,
};
use std::path::Path;

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "tenacious_uploads_total",
        "Total number of uploads",
        &["status"]
    ).expect("uploads counter registers once");

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "tenacious_upload_bytes_total",
        "Total bytes acknowledged by the store"
    ).expect("bytes counter registers once");

    pub static ref UPLOAD_DURATION: Histogram = register_histogram!(
        "tenacious_upload_duration_seconds",
        "Wall clock duration of verified uploads",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 21600.0]
    ).expect("duration histogram registers once");

    // Part metrics
    pub static ref PARTS_UPLOADED: Counter = register_counter!(
        "tenacious_parts_uploaded_total",
        "Parts acknowledged with an ETag"
    ).expect("parts counter registers once");

    pub static ref RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "tenacious_retries_total",
        "Retried store calls",
        &["operation", "reason"]
    ).expect("retries counter registers once");

    // Completion metrics
    pub static ref COMPLETION_ATTEMPTS: Counter = register_counter!(
        "tenacious_completion_attempts_total",
        "CompleteMultipartUpload requests sent"
    ).expect("completion counter registers once");

    pub static ref COMPLETION_POLLS: CounterVec = register_counter_vec!(
        "tenacious_completion_polls_total",
        "HeadObject polls after a failed completion",
        &["outcome"]  // "confirmed", "mismatch" or "error"
    ).expect("poll counter registers once");

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "tenacious_errors_total",
        "Total errors",
        &["type"]
    ).expect("error counter registers once");
}

/// Record a part the store acknowledged
pub fn record_part_uploaded(bytes: u64) {
    PARTS_UPLOADED.inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a retry scheduled for `operation` because of `reason`
pub fn record_retry(operation: &str, reason: &str) {
    RETRIES_TOTAL.with_label_values(&[operation, reason]).inc();
}

pub fn record_completion_attempt() {
    COMPLETION_ATTEMPTS.inc();
}

pub fn record_completion_poll(outcome: &str) {
    COMPLETION_POLLS.with_label_values(&[outcome]).inc();
}

/// Record a verified upload
pub fn record_upload_success(duration_secs: f64) {
    UPLOADS_TOTAL.with_label_values(&["success"]).inc();
    UPLOAD_DURATION.observe(duration_secs);
}

/// Record a failed upload
pub fn record_upload_failure(error_type: &str) {
    UPLOADS_TOTAL.with_label_values(&["failure"]).inc();
    record_error(error_type);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render the default registry in text exposition format
pub fn render() -> std::io::Result<String> {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .map_err(|e| std::io::Error::other(e.to_string()))
}

/// Write the registry to `path`, replacing it atomically so a collector never
/// reads a half written file.
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    let rendered = render()?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, rendered)?;
    std::fs::rename(&tmp, path)
}
