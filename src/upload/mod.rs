//! Upload module
//!
//! Multipart upload engine: chunk planning, the part worker pool, the
//! authoritative parts recount, completion with out-of-band detection, and
//! final size verification. [`driver::UploadDriver`] sequences the phases.

use crate::s3::StoreError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub mod complete;
pub mod driver;
pub mod plan;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod verify;
pub mod worker;

pub use complete::{initial_completion_timeout, CompletionCoordinator, CompletionOutcome};
pub use driver::{UploadDriver, UploadFailure};
pub use plan::{plan_chunks, Chunk};
pub use progress::{Reporter, TracingReporter, UploadContext, UploadEvent};
pub use registry::PartsRegistry;
pub use retry::{RetryPolicy, Verdict};
pub use worker::PartWorkerPool;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server reported insufficient storage while uploading part {part_number}")]
    InsufficientStorage {
        part_number: u32,
        #[source]
        source: StoreError,
    },

    #[error("{operation}: exceeded {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("{operation} failed: {source}")]
    Store {
        operation: String,
        #[source]
        source: StoreError,
    },

    #[error("Expected {expected} parts but the store reports {found}")]
    PartCountMismatch { expected: u32, found: u32 },

    #[error("Could not complete multipart upload after {attempts} attempts: {source}")]
    CompletionFailed {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Exceeded {attempts} attempts without completing multipart upload")]
    CompletionExhausted { attempts: u32 },

    #[error("Multipart upload verification failed: remote size {actual:?}, local size {expected}")]
    SizeMismatch { expected: u64, actual: Option<u64> },

    #[error("Part {part_number} skipped: upload aborted")]
    Aborted { part_number: u32 },
}

impl UploadError {
    /// The store error underneath, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            UploadError::InsufficientStorage { source, .. }
            | UploadError::RetriesExhausted { source, .. }
            | UploadError::Store { source, .. }
            | UploadError::CompletionFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Configuration(_) => "configuration",
            UploadError::IoError(_) => "io",
            UploadError::InsufficientStorage { .. } => "insufficient_storage",
            UploadError::RetriesExhausted { .. } => "retries_exhausted",
            UploadError::Store { .. } => "store",
            UploadError::PartCountMismatch { .. } => "part_count_mismatch",
            UploadError::CompletionFailed { .. } => "completion_failed",
            UploadError::CompletionExhausted { .. } => "completion_exhausted",
            UploadError::SizeMismatch { .. } => "size_mismatch",
            UploadError::Aborted { .. } => "aborted",
        }
    }
}

/// One run's multipart session
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub file_path: PathBuf,
    pub part_size: u64,
    pub max_retries: u32,
    pub file_size: u64,
    pub total_parts: u32,
    pub start_time: Instant,
}

/// Summary of a verified upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub upload_id: String,
    pub bytes: u64,
    pub parts: u32,
    pub elapsed: Duration,
}

impl UploadReport {
    /// Throughput in MB/s (MiB, as the summary line prints it)
    pub fn mb_per_sec(&self) -> f64 {
        mb_per_sec(self.bytes, self.elapsed)
    }
}

/// MB/s, infinite when no time elapsed.
pub fn mb_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / (1024.0 * 1024.0)) / secs
    } else {
        f64::INFINITY
    }
}

/// Render a duration as `HHh MMm SSs`.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}h {:02}m {:02}s",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
