//! Upload context and observability
//!
//! Workers share one [`UploadContext`]: the progress counter, the run-wide
//! abort flag and the [`Reporter`] that turns [`UploadEvent`]s into log lines
//! and metrics. Nothing here feeds back into correctness decisions except the
//! abort flag.

use super::{format_hms, UploadReport};
use crate::metrics;
use crate::s3::StoreError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something worth telling the operator about
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    SessionCreated {
        upload_id: String,
        file_size: u64,
        total_parts: u32,
        part_size: u64,
    },
    PartAttempt {
        part_number: u32,
        attempt: u32,
        offset: u64,
        length: u64,
    },
    PartUploaded {
        part_number: u32,
        bytes: u64,
        completed: u32,
        total_parts: u32,
        eta: Option<Duration>,
    },
    /// A call failed and will be retried after `backoff`
    RetryScheduled {
        operation: String,
        part_number: Option<u32>,
        attempt: u32,
        backoff: Duration,
        error: StoreError,
    },
    RetriesExhausted {
        operation: String,
        part_number: Option<u32>,
        attempts: u32,
    },
    StorageFull {
        part_number: u32,
    },
    PartsCounted {
        found: u32,
        expected: u32,
    },
    CompletionAttempt {
        attempt: u32,
        timeout: Duration,
    },
    CompletionFailed {
        attempt: u32,
        timeout: Duration,
        error: StoreError,
    },
    /// Waiting before checking whether the merge finished anyway
    CompletionWait {
        wait: Duration,
    },
    /// Session gone, polling without waiting
    SessionMissing,
    PollMismatch {
        expected: u64,
        actual: Option<u64>,
    },
    PollFailed {
        error: String,
    },
    TimeoutIncreased {
        timeout: Duration,
    },
    Completed {
        confirmed_by_poll: bool,
    },
    Verified {
        size: u64,
    },
    Finished {
        report: UploadReport,
    },
    Failed {
        upload_id: Option<String>,
        kind: &'static str,
        error: String,
    },
}

/// Sink for upload events
pub trait Reporter: Send + Sync {
    fn report(&self, event: UploadEvent);
}

/// Logs every event with `tracing` and updates the Prometheus counters
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: UploadEvent) {
        match event {
            UploadEvent::SessionCreated {
                upload_id,
                file_size,
                total_parts,
                part_size,
            } => {
                tracing::info!(
                    upload_id = %upload_id,
                    file_size,
                    total_parts,
                    part_size,
                    "Initiated multipart upload"
                );
            }
            UploadEvent::PartAttempt {
                part_number,
                attempt,
                offset,
                length,
            } => {
                tracing::info!(
                    part_number,
                    attempt,
                    "Part {}: reading bytes {}-{}",
                    part_number,
                    offset,
                    offset + length
                );
            }
            UploadEvent::PartUploaded {
                part_number,
                bytes,
                completed,
                total_parts,
                eta,
            } => {
                metrics::record_part_uploaded(bytes);
                let progress = 100.0 * f64::from(completed) / f64::from(total_parts.max(1));
                let eta = eta.map(format_hms).unwrap_or_else(|| "?".to_string());
                tracing::info!(
                    part_number,
                    completed,
                    total_parts,
                    "Part {}: uploaded, progress: {:.1}%, est time remaining: {}",
                    part_number,
                    progress,
                    eta
                );
            }
            UploadEvent::RetryScheduled {
                operation,
                part_number,
                attempt,
                backoff,
                error,
            } => {
                metrics::record_retry(&operation_label(&operation, part_number), error.kind());
                tracing::warn!(
                    operation = %operation,
                    part_number = ?part_number,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %error,
                    "{}: attempt {} failed, retrying in {}s",
                    operation,
                    attempt,
                    backoff.as_secs()
                );
            }
            UploadEvent::RetriesExhausted {
                operation,
                part_number,
                attempts,
            } => {
                tracing::error!(
                    operation = %operation,
                    part_number = ?part_number,
                    attempts,
                    "{}: exceeded max retries",
                    operation
                );
            }
            UploadEvent::StorageFull { part_number } => {
                tracing::error!(
                    part_number,
                    "Part {}: received 507 Insufficient Storage; aborting",
                    part_number
                );
            }
            UploadEvent::PartsCounted { found, expected } => {
                tracing::info!(
                    found,
                    expected,
                    "Verified {} of {} parts uploaded",
                    found,
                    expected
                );
            }
            UploadEvent::CompletionAttempt { attempt, timeout } => {
                metrics::record_completion_attempt();
                tracing::info!(
                    attempt,
                    timeout_secs = timeout.as_secs(),
                    "Sending complete_multipart_upload request"
                );
            }
            UploadEvent::CompletionFailed {
                attempt,
                timeout,
                error,
            } => {
                if error.is_client_timeout() {
                    tracing::warn!(
                        attempt,
                        error = %error,
                        "complete_multipart_upload timed out after {}s",
                        timeout.as_secs()
                    );
                } else {
                    tracing::warn!(
                        attempt,
                        error = %error,
                        "complete_multipart_upload failed (attempt {})",
                        attempt
                    );
                }
            }
            UploadEvent::CompletionWait { wait } => {
                tracing::info!(
                    wait_secs = wait.as_secs(),
                    "Waiting {}s before checking object state to see if merge has completed",
                    wait.as_secs()
                );
            }
            UploadEvent::SessionMissing => {
                tracing::info!("Upload session missing; checking object state immediately");
            }
            UploadEvent::PollMismatch { expected, actual } => {
                metrics::record_completion_poll("mismatch");
                tracing::info!(
                    expected,
                    actual = ?actual,
                    "HeadObject size mismatch; will retry complete_multipart_upload"
                );
            }
            UploadEvent::PollFailed { error } => {
                metrics::record_completion_poll("error");
                tracing::info!(error = %error, "head_object failed after error");
            }
            UploadEvent::TimeoutIncreased { timeout } => {
                tracing::info!(
                    timeout_secs = timeout.as_secs(),
                    "Increasing timeout to {}s and retrying",
                    timeout.as_secs()
                );
            }
            UploadEvent::Completed { confirmed_by_poll } => {
                if confirmed_by_poll {
                    metrics::record_completion_poll("confirmed");
                    tracing::info!("HeadObject confirms multipart upload merge has completed");
                } else {
                    tracing::info!("Multipart upload completed");
                }
            }
            UploadEvent::Verified { size } => {
                tracing::info!(
                    size,
                    "Verified upload: remote object size {} bytes matches local file size",
                    size
                );
            }
            UploadEvent::Finished { report } => {
                metrics::record_upload_success(report.elapsed.as_secs_f64());
                tracing::info!(
                    upload_id = %report.upload_id,
                    bytes = report.bytes,
                    parts = report.parts,
                    "Upload speed {:.2} MB/s, duration {}",
                    report.mb_per_sec(),
                    format_hms(report.elapsed)
                );
            }
            UploadEvent::Failed {
                upload_id,
                kind,
                error,
            } => {
                metrics::record_upload_failure(kind);
                tracing::error!(error = %error, "Upload interrupted: {}", error);
                if let Some(upload_id) = upload_id {
                    tracing::info!(
                        upload_id = %upload_id,
                        "UploadId {} left open for resumption",
                        upload_id
                    );
                }
            }
        }
    }
}

fn operation_label(operation: &str, part_number: Option<u32>) -> String {
    match part_number {
        Some(_) => "upload_part".to_string(),
        None => operation.to_string(),
    }
}

/// Count of parts uploaded so far
#[derive(Debug, Default)]
pub struct ProgressCounter {
    completed: Mutex<u32>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new count
    pub fn increment(&self) -> u32 {
        let mut completed = self.completed.lock();
        *completed += 1;
        *completed
    }

    pub fn completed(&self) -> u32 {
        *self.completed.lock()
    }
}

/// Linear extrapolation of the remaining time from what `part_number`
/// represents of the whole. Ignores the order parts actually finish in.
pub fn estimate_remaining(
    elapsed: Duration,
    part_number: u32,
    total_parts: u32,
) -> Option<Duration> {
    if part_number == 0 || total_parts == 0 {
        return None;
    }
    let fraction = f64::from(part_number) / f64::from(total_parts);
    let remaining = elapsed.as_secs_f64() * (1.0 / fraction - 1.0);
    Some(Duration::from_secs_f64(remaining.max(0.0)))
}

/// State shared by every worker of one run
pub struct UploadContext {
    progress: ProgressCounter,
    aborted: AtomicBool,
    reporter: Arc<dyn Reporter>,
}

impl UploadContext {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            progress: ProgressCounter::new(),
            aborted: AtomicBool::new(false),
            reporter,
        }
    }

    pub fn report(&self, event: UploadEvent) {
        self.reporter.report(event);
    }

    pub fn progress(&self) -> &ProgressCounter {
        &self.progress
    }

    /// Stop handing out work; in-flight requests are left to finish
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}
