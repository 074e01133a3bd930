//! Completion coordinator
//!
//! Sends CompleteMultipartUpload and, when it fails, asks the store whether
//! the merge finished anyway before trying again. Proxies in front of slow,
//! filesystem backed gateways cut idle connections on their own schedule, so
//! a timed out completion frequently succeeded server side.
//!
//! ```text
//! COMPLETING --ok--> DONE
//! COMPLETING --error--> POLLING --size matches--> DONE
//!                       POLLING --mismatch / poll error--> COMPLETING (timeout x2)
//!                       POLLING --attempts exhausted--> FAILED
//! ```

use super::progress::{UploadContext, UploadEvent};
use super::retry::{completion_verdict, RetryPolicy, Verdict};
use super::{UploadError, UploadSession};
use crate::s3::{CompletedPart, ObjectStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// Lower bound for the first completion timeout
pub const MIN_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra seconds of completion timeout per started GiB
pub const COMPLETION_SECS_PER_GIB: u64 = 5;

/// First per-attempt timeout for a file of `file_size` bytes
pub fn initial_completion_timeout(file_size: u64) -> Duration {
    let scaled = Duration::from_secs(file_size.div_ceil(GIB) * COMPLETION_SECS_PER_GIB);
    scaled.max(MIN_COMPLETION_TIMEOUT)
}

/// How the completion phase ended
pub struct CompletionOutcome {
    /// Handle the merge was confirmed with; carries the escalated timeout
    pub store: Arc<dyn ObjectStore>,
    pub attempts: u32,
    pub confirmed_by_poll: bool,
}

impl std::fmt::Debug for CompletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOutcome")
            .field("attempts", &self.attempts)
            .field("confirmed_by_poll", &self.confirmed_by_poll)
            .finish_non_exhaustive()
    }
}

enum Phase {
    Completing,
    Polling {
        client: Arc<dyn ObjectStore>,
        skip_wait: bool,
    },
    Done {
        client: Arc<dyn ObjectStore>,
        confirmed_by_poll: bool,
    },
    Failed,
}

/// Drives one session from uploaded parts to a merged object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionCoordinator {
    policy: RetryPolicy,
    initial_timeout: Duration,
}

impl CompletionCoordinator {
    pub fn new(policy: RetryPolicy, initial_timeout: Duration) -> Self {
        Self {
            policy,
            initial_timeout,
        }
    }

    /// Coordinator whose first timeout is scaled to the file size
    pub fn for_file_size(policy: RetryPolicy, file_size: u64) -> Self {
        Self::new(policy, initial_completion_timeout(file_size))
    }

    /// Complete the session. `parts` must already be in ascending order.
    ///
    /// `store` itself is never reconfigured; every attempt gets its own handle
    /// from [`ObjectStore::with_timeout`].
    #[tracing::instrument(
        name = "upload.complete",
        skip(self, store, session, parts, ctx),
        fields(
            upload_id = %session.upload_id,
            parts = parts.len(),
            initial_timeout_secs = self.initial_timeout.as_secs()
        )
    )]
    pub async fn run(
        &self,
        store: &Arc<dyn ObjectStore>,
        session: &UploadSession,
        parts: &[CompletedPart],
        ctx: &UploadContext,
    ) -> Result<CompletionOutcome, UploadError> {
        let max_attempts = self.policy.max_retries();
        let mut attempt = 1;
        let mut timeout = self.initial_timeout;
        let mut last_error: Option<StoreError> = None;
        let mut poll_saw_missing_session = false;
        let mut phase = Phase::Completing;

        loop {
            phase = match phase {
                Phase::Completing => {
                    let client = store.with_timeout(timeout);
                    ctx.report(UploadEvent::CompletionAttempt { attempt, timeout });

                    match client
                        .complete_multipart_upload(
                            &session.bucket,
                            &session.key,
                            &session.upload_id,
                            parts,
                        )
                        .await
                    {
                        Ok(()) => Phase::Done {
                            client,
                            confirmed_by_poll: false,
                        },
                        Err(err) => {
                            ctx.report(UploadEvent::CompletionFailed {
                                attempt,
                                timeout,
                                error: err.clone(),
                            });
                            let skip_wait = poll_saw_missing_session
                                || completion_verdict(&err) == Verdict::SkipWait;
                            last_error = Some(err);
                            Phase::Polling { client, skip_wait }
                        }
                    }
                }

                Phase::Polling { client, skip_wait } => {
                    if skip_wait {
                        ctx.report(UploadEvent::SessionMissing);
                    } else {
                        ctx.report(UploadEvent::CompletionWait { wait: timeout });
                        tokio::time::sleep(timeout).await;
                    }

                    let head = self
                        .policy
                        .call(ctx, "head_object", || {
                            client.head_object(&session.bucket, &session.key)
                        })
                        .await;

                    let confirmed = match head {
                        Ok(meta) if meta.size == Some(session.file_size) => true,
                        Ok(meta) => {
                            poll_saw_missing_session = false;
                            ctx.report(UploadEvent::PollMismatch {
                                expected: session.file_size,
                                actual: meta.size,
                            });
                            false
                        }
                        Err(err) => {
                            poll_saw_missing_session = err
                                .store_error()
                                .is_some_and(StoreError::is_session_missing);
                            ctx.report(UploadEvent::PollFailed {
                                error: err.to_string(),
                            });
                            false
                        }
                    };

                    if confirmed {
                        Phase::Done {
                            client,
                            confirmed_by_poll: true,
                        }
                    } else if attempt >= max_attempts {
                        Phase::Failed
                    } else {
                        attempt += 1;
                        timeout = timeout.saturating_mul(2);
                        ctx.report(UploadEvent::TimeoutIncreased { timeout });
                        Phase::Completing
                    }
                }

                Phase::Done {
                    client,
                    confirmed_by_poll,
                } => {
                    ctx.report(UploadEvent::Completed { confirmed_by_poll });
                    return Ok(CompletionOutcome {
                        store: client,
                        attempts: attempt,
                        confirmed_by_poll,
                    });
                }

                Phase::Failed => {
                    return Err(match last_error {
                        Some(source) => UploadError::CompletionFailed {
                            attempts: attempt,
                            source,
                        },
                        None => UploadError::CompletionExhausted { attempts: attempt },
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_timeout_floor() {
        assert_eq!(initial_completion_timeout(0), Duration::from_secs(60));
        assert_eq!(
            initial_completion_timeout(101 * 1024 * 1024),
            Duration::from_secs(60)
        );
        assert_eq!(initial_completion_timeout(12 * GIB), Duration::from_secs(60));
    }

    #[test]
    fn test_initial_timeout_scales_per_gib() {
        assert_eq!(initial_completion_timeout(13 * GIB), Duration::from_secs(65));
        assert_eq!(
            initial_completion_timeout(20 * GIB + 1),
            Duration::from_secs(105)
        );
    }

    #[test]
    fn test_for_file_size_uses_scaled_timeout() {
        let policy = RetryPolicy::new(5);
        assert_eq!(
            CompletionCoordinator::for_file_size(policy, 100 * GIB),
            CompletionCoordinator::new(policy, Duration::from_secs(500))
        );
    }
}
