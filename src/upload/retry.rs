//! Retry and backoff policy
//!
//! Each call site turns a [`StoreError`] into a [`Verdict`] with its own rule:
//!
//! | Call site | Retry | Fatal | SkipWait |
//! |-----------|-------|-------|----------|
//! | create / head / list ([`shared_verdict`]) | timeouts, 524 | everything else | - |
//! | upload part ([`part_verdict`]) | everything but 507 | 507 | - |
//! | complete ([`completion_verdict`]) | everything but missing session | - | `NoSuchUpload` |
//!
//! Backoff is `2^attempt` seconds. The SDK's own standard retry mode runs
//! underneath and covers the other transient classes.

use super::progress::{UploadContext, UploadEvent};
use super::UploadError;
use crate::s3::StoreError;
use std::future::Future;
use std::time::Duration;

/// What a call site does with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Back off and try again while attempts remain
    Retry,
    /// Stop the run
    Fatal,
    /// The multipart session is gone: check the object right away
    SkipWait,
}

/// Rule for idempotent reads and session creation
pub fn shared_verdict(err: &StoreError) -> Verdict {
    if err.is_timeout() {
        Verdict::Retry
    } else {
        Verdict::Fatal
    }
}

/// Rule for UploadPart
pub fn part_verdict(err: &StoreError) -> Verdict {
    if err.is_insufficient_storage() {
        Verdict::Fatal
    } else {
        Verdict::Retry
    }
}

/// Rule for CompleteMultipartUpload
pub fn completion_verdict(err: &StoreError) -> Verdict {
    if err.is_session_missing() {
        Verdict::SkipWait
    } else {
        Verdict::Retry
    }
}

/// Attempt budget and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    /// `max_retries` is the total number of attempts per call; at least one
    /// attempt is always made.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt))
    }

    /// Run an idempotent call, retrying timeouts with exponential backoff.
    ///
    /// Non-timeout errors come back immediately as [`UploadError::Store`];
    /// running out of attempts yields [`UploadError::RetriesExhausted`] with
    /// the last error.
    pub async fn call<T, F, Fut>(
        &self,
        ctx: &UploadContext,
        operation: &str,
        mut f: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if shared_verdict(&err) != Verdict::Retry {
                return Err(UploadError::Store {
                    operation: operation.to_string(),
                    source: err,
                });
            }

            if attempt >= self.max_retries {
                ctx.report(UploadEvent::RetriesExhausted {
                    operation: operation.to_string(),
                    part_number: None,
                    attempts: attempt,
                });
                return Err(UploadError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }

            let backoff = self.backoff(attempt);
            ctx.report(UploadEvent::RetryScheduled {
                operation: operation.to_string(),
                part_number: None,
                attempt,
                backoff,
                error: err,
            });
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}
