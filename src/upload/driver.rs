//! Upload driver
//!
//! Runs the phases strictly one after another: plan, create session, upload
//! parts, recount, complete, verify. A failed run keeps its upload id so the
//! session can be completed or aborted by hand; nothing here ever aborts it.

use super::complete::CompletionCoordinator;
use super::plan::{self, plan_chunks};
use super::progress::{Reporter, TracingReporter, UploadContext, UploadEvent};
use super::registry::{completion_order, PartsRegistry};
use super::retry::RetryPolicy;
use super::verify::verify_size;
use super::worker::PartWorkerPool;
use super::{UploadError, UploadReport, UploadSession};
use crate::config::{UploadConfig, MAX_PARTS};
use crate::s3::ObjectStore;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// A run that did not produce a verified object
#[derive(Error, Debug)]
#[error("upload failed (upload id: {})", .upload_id.as_deref().unwrap_or("none"))]
pub struct UploadFailure {
    /// Set once the session exists; left open on the store
    pub upload_id: Option<String>,
    #[source]
    pub error: UploadError,
}

/// Uploads one file to one key
pub struct UploadDriver {
    store: Arc<dyn ObjectStore>,
    reporter: Arc<dyn Reporter>,
    config: UploadConfig,
}

impl UploadDriver {
    /// Driver reporting through [`TracingReporter`]
    pub fn new(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self {
            store,
            reporter: Arc::new(TracingReporter),
            config,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Upload the file and verify the result.
    #[tracing::instrument(
        name = "upload.run",
        skip(self),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %self.config.key,
            file = %self.config.file.display()
        )
    )]
    pub async fn run(&self) -> Result<UploadReport, UploadFailure> {
        let ctx = Arc::new(UploadContext::new(Arc::clone(&self.reporter)));
        let mut upload_id = None;

        match self.execute(&ctx, &mut upload_id).await {
            Ok(report) => {
                ctx.report(UploadEvent::Finished {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(error) => {
                ctx.report(UploadEvent::Failed {
                    upload_id: upload_id.clone(),
                    kind: error.kind(),
                    error: error.to_string(),
                });
                Err(UploadFailure { upload_id, error })
            }
        }
    }

    async fn execute(
        &self,
        ctx: &Arc<UploadContext>,
        upload_id: &mut Option<String>,
    ) -> Result<UploadReport, UploadError> {
        let config = &self.config;
        let start_time = Instant::now();

        let file_size = tokio::fs::metadata(&config.file).await?.len();
        if file_size == 0 {
            return Err(UploadError::Configuration(format!(
                "{} is empty; multipart uploads need at least one part",
                config.file.display()
            )));
        }

        let total_parts = plan::total_parts(file_size, config.part_size)?;
        if u64::from(total_parts) > MAX_PARTS {
            return Err(UploadError::Configuration(format!(
                "{} parts of {} bytes exceed the limit of {} parts; use a larger chunk size",
                total_parts, config.part_size, MAX_PARTS
            )));
        }
        let chunks = plan_chunks(file_size, config.part_size)?;

        tracing::info!(
            file_size,
            total_parts,
            part_size = config.part_size,
            "File size: {} bytes; will upload in {} parts of up to {} bytes each",
            file_size,
            total_parts,
            config.part_size
        );

        let policy = RetryPolicy::new(config.max_retries);
        let store = &self.store;

        let id = policy
            .call(ctx, "create_multipart_upload", || {
                store.create_multipart_upload(&config.bucket, &config.key)
            })
            .await?;
        *upload_id = Some(id.clone());

        ctx.report(UploadEvent::SessionCreated {
            upload_id: id.clone(),
            file_size,
            total_parts,
            part_size: config.part_size,
        });

        let session = Arc::new(UploadSession {
            upload_id: id.clone(),
            bucket: config.bucket.clone(),
            key: config.key.clone(),
            file_path: config.file.clone(),
            part_size: config.part_size,
            max_retries: policy.max_retries(),
            file_size,
            total_parts,
            start_time,
        });

        let uploaded = PartWorkerPool::new(config.concurrency, policy)
            .run(
                Arc::clone(store),
                Arc::clone(&session),
                chunks,
                Arc::clone(ctx),
            )
            .await?;

        let listed = policy
            .call(ctx, "list_parts", || {
                store.list_parts(&session.bucket, &session.key, &session.upload_id)
            })
            .await?;
        let registry = PartsRegistry::from_listing(listed);
        ctx.report(UploadEvent::PartsCounted {
            found: u32::try_from(registry.len()).unwrap_or(u32::MAX),
            expected: total_parts,
        });
        let missing = registry.missing(total_parts);
        if !missing.is_empty() {
            tracing::error!(missing = ?missing, "Store does not report parts {:?}", missing);
        }
        registry.ensure_complete(total_parts)?;

        let parts: Vec<_> = completion_order(uploaded)
            .into_iter()
            .filter(|part| registry.contains(part.part_number))
            .collect();

        let outcome = CompletionCoordinator::for_file_size(policy, file_size)
            .run(store, &session, &parts, ctx)
            .await?;

        verify_size(outcome.store.as_ref(), &session, policy, ctx).await?;

        Ok(UploadReport {
            upload_id: id,
            bytes: file_size,
            parts: total_parts,
            elapsed: start_time.elapsed(),
        })
    }
}
