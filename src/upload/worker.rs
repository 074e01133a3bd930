//! Part upload worker pool
//!
//! A fixed number of tokio tasks pull chunks from a shared queue until it is
//! empty or the run is aborted. Every attempt opens the source file on its
//! own, so workers never share a file position.

use super::plan::Chunk;
use super::progress::{estimate_remaining, UploadContext, UploadEvent};
use super::retry::{part_verdict, RetryPolicy, Verdict};
use super::{UploadError, UploadSession};
use crate::s3::{CompletedPart, ObjectStore};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinSet;

/// Bounded-concurrency part uploader
#[derive(Debug, Clone, Copy)]
pub struct PartWorkerPool {
    concurrency: usize,
    policy: RetryPolicy,
}

impl PartWorkerPool {
    /// Create a pool of `concurrency` workers (at least one)
    pub fn new(concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            policy,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Upload every chunk, returning the parts sorted by part number.
    ///
    /// Waits for every worker to finish before returning, even after a fatal
    /// error. The first fatal error wins; `Aborted` only surfaces when nothing
    /// more specific was recorded.
    #[tracing::instrument(
        name = "upload.parts",
        skip(self, store, session, chunks, ctx),
        fields(
            upload_id = %session.upload_id,
            total_parts = chunks.len(),
            concurrency = self.concurrency
        )
    )]
    pub async fn run(
        &self,
        store: Arc<dyn ObjectStore>,
        session: Arc<UploadSession>,
        chunks: Vec<Chunk>,
        ctx: Arc<UploadContext>,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let width = self.concurrency.min(chunks.len().max(1));
        let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));
        let mut workers = JoinSet::new();

        for _ in 0..width {
            let queue = Arc::clone(&queue);
            let store = Arc::clone(&store);
            let session = Arc::clone(&session);
            let ctx = Arc::clone(&ctx);
            let policy = self.policy;

            workers.spawn(async move {
                let mut parts = Vec::new();
                while !ctx.is_aborted() {
                    let next = queue.lock().pop_front();
                    let Some(chunk) = next else {
                        break;
                    };
                    match upload_chunk(store.as_ref(), &session, chunk, policy, &ctx).await {
                        Ok(part) => parts.push(part),
                        Err(err) => {
                            ctx.abort();
                            return Err(err);
                        }
                    }
                }
                Ok(parts)
            });
        }

        let mut parts = Vec::new();
        let mut failure: Option<UploadError> = None;

        while let Some(joined) = workers.join_next().await {
            let outcome = joined.unwrap_or_else(|join_err| {
                ctx.abort();
                Err(UploadError::IoError(std::io::Error::other(format!(
                    "part worker stopped unexpectedly: {}",
                    join_err
                ))))
            });
            match outcome {
                Ok(mut uploaded) => parts.append(&mut uploaded),
                Err(err) => record_failure(&mut failure, err),
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }
}

fn record_failure(slot: &mut Option<UploadError>, err: UploadError) {
    let replace = match slot {
        None => true,
        Some(UploadError::Aborted { .. }) => !matches!(err, UploadError::Aborted { .. }),
        Some(_) => false,
    };
    if replace {
        *slot = Some(err);
    }
}

/// Upload one chunk with its own retry loop
async fn upload_chunk(
    store: &dyn ObjectStore,
    session: &UploadSession,
    chunk: Chunk,
    policy: RetryPolicy,
    ctx: &UploadContext,
) -> Result<CompletedPart, UploadError> {
    let part_number = chunk.part_number;
    let operation = format!("Part {}", part_number);
    let mut attempt = 1;

    loop {
        ctx.report(UploadEvent::PartAttempt {
            part_number,
            attempt,
            offset: chunk.offset,
            length: chunk.length,
        });

        let body = read_chunk(&session.file_path, chunk).await?;
        let err = match store
            .upload_part(
                &session.bucket,
                &session.key,
                &session.upload_id,
                part_number,
                body,
            )
            .await
        {
            Ok(etag) => {
                let completed = ctx.progress().increment();
                ctx.report(UploadEvent::PartUploaded {
                    part_number,
                    bytes: chunk.length,
                    completed,
                    total_parts: session.total_parts,
                    eta: estimate_remaining(
                        session.start_time.elapsed(),
                        part_number,
                        session.total_parts,
                    ),
                });
                return Ok(CompletedPart { part_number, etag });
            }
            Err(err) => err,
        };

        if part_verdict(&err) == Verdict::Fatal {
            ctx.abort();
            ctx.report(UploadEvent::StorageFull { part_number });
            return Err(UploadError::InsufficientStorage {
                part_number,
                source: err,
            });
        }

        if attempt >= policy.max_retries() {
            ctx.report(UploadEvent::RetriesExhausted {
                operation: operation.clone(),
                part_number: Some(part_number),
                attempts: attempt,
            });
            return Err(UploadError::RetriesExhausted {
                operation,
                attempts: attempt,
                source: err,
            });
        }

        if ctx.is_aborted() {
            return Err(UploadError::Aborted { part_number });
        }

        let backoff = policy.backoff(attempt);
        ctx.report(UploadEvent::RetryScheduled {
            operation: operation.clone(),
            part_number: Some(part_number),
            attempt,
            backoff,
            error: err,
        });
        tokio::time::sleep(backoff).await;

        // Another part may have hit a fatal error while we slept
        if ctx.is_aborted() {
            return Err(UploadError::Aborted { part_number });
        }
        attempt += 1;
    }
}

/// Read exactly the chunk's byte range through a fresh file handle
pub async fn read_chunk(path: &Path, chunk: Chunk) -> Result<Bytes, UploadError> {
    let length = usize::try_from(chunk.length).map_err(|_| {
        UploadError::Configuration(format!(
            "part {} of {} bytes does not fit in memory",
            chunk.part_number, chunk.length
        ))
    })?;

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(chunk.offset)).await?;

    let mut buf = vec![0u8; length];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}
