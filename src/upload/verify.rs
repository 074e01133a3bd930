//! Final size verification

use super::progress::{UploadContext, UploadEvent};
use super::retry::RetryPolicy;
use super::{UploadError, UploadSession};
use crate::s3::ObjectStore;

/// Exact size match between the remote object and the local file
pub fn check_size(expected: u64, actual: Option<u64>) -> Result<u64, UploadError> {
    match actual {
        Some(size) if size == expected => Ok(size),
        _ => Err(UploadError::SizeMismatch { expected, actual }),
    }
}

/// Fetch the object's metadata and compare its size with the source file.
#[tracing::instrument(
    name = "upload.verify",
    skip(store, session, policy, ctx),
    fields(
        s3.bucket = %session.bucket,
        s3.key = %session.key,
        expected = session.file_size,
        s3.etag = tracing::field::Empty
    ),
    err
)]
pub async fn verify_size(
    store: &dyn ObjectStore,
    session: &UploadSession,
    policy: RetryPolicy,
    ctx: &UploadContext,
) -> Result<u64, UploadError> {
    let head = policy
        .call(ctx, "head_object", || {
            store.head_object(&session.bucket, &session.key)
        })
        .await?;

    if let Some(etag) = head.etag.as_deref() {
        tracing::Span::current().record("s3.etag", etag);
    }

    let size = check_size(session.file_size, head.size)?;
    ctx.report(UploadEvent::Verified { size });
    Ok(size)
}
