//! Object store client module
//!
//! Defines the [`ObjectStore`] capability the uploader drives, the
//! [`StoreError`] classification every call reports, and [`S3Client`], the
//! AWS SDK backed implementation.
//!
//! # Error classes
//!
//! | Condition | Variant | Upload behaviour |
//! |-----------|---------|------------------|
//! | Client read/connect timeout | `Timeout` | retried |
//! | HTTP 524 from a proxy | `GatewayTimeout` | retried |
//! | `NoSuchUpload` | `NoSuchUpload` | completion polls immediately |
//! | HTTP 507 | `InsufficientStorage` | run aborts |
//! | Anything else | `Service` / `Request` / `InvalidResponse` | depends on call site |
//!
//! # Example
//!
//! ```no_run
//! use tenacious_uploadr::s3::{ObjectStore, S3Client, S3ClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = S3ClientConfig {
//!     region: "us-east-1".to_string(),
//!     endpoint: Some("http://localhost:9000".to_string()),
//!     access_key: Some("minioadmin".to_string()),
//!     secret_key: Some("minioadmin".to_string()),
//!     session_token: None,
//!     max_attempts: 5,
//!     request_timeout: std::time::Duration::from_secs(60),
//! };
//!
//! let client = S3Client::new(config)?;
//! let head = client.head_object("my-bucket", "big.iso").await?;
//! println!("size: {:?}", head.size);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credentials;

pub use client::{S3Client, S3ClientConfig};
pub use credentials::{Credentials, CredentialsError, CredentialsProvider};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Status code some proxies (Cloudflare among them) return when the origin
/// did not answer within their own idle window.
pub const INTERMEDIARY_TIMEOUT_STATUS: u16 = 524;

/// Status code for "Insufficient Storage".
pub const INSUFFICIENT_STORAGE_STATUS: u16 = 507;

/// S3 error code reported when a multipart upload id is unknown.
pub const NO_SUCH_UPLOAD_CODE: &str = "NoSuchUpload";

/// Errors reported by an [`ObjectStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("intermediary timeout (HTTP 524): {0}")]
    GatewayTimeout(String),

    #[error("multipart upload not found: {0}")]
    NoSuchUpload(String),

    #[error("insufficient storage (HTTP 507): {0}")]
    InsufficientStorage(String),

    #[error("service error (status {status:?}, code {code:?}): {message}")]
    Service {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("request error: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// Build an error from a raw HTTP status and optional S3 error code.
    ///
    /// Status codes with a dedicated meaning win over the error code.
    pub fn from_status(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match (status, code) {
            (INTERMEDIARY_TIMEOUT_STATUS, _) => StoreError::GatewayTimeout(message),
            (INSUFFICIENT_STORAGE_STATUS, _) => StoreError::InsufficientStorage(message),
            (_, Some(NO_SUCH_UPLOAD_CODE)) => StoreError::NoSuchUpload(message),
            _ => StoreError::Service {
                status: Some(status),
                code: code.map(str::to_string),
                message,
            },
        }
    }

    /// Client-observed timeout or intermediary timeout status.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::GatewayTimeout(_))
    }

    /// The client itself gave up waiting (as opposed to a proxy answering 524).
    pub fn is_client_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }

    pub fn is_insufficient_storage(&self) -> bool {
        matches!(self, StoreError::InsufficientStorage(_))
    }

    pub fn is_session_missing(&self) -> bool {
        matches!(self, StoreError::NoSuchUpload(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Timeout(_) => "timeout",
            StoreError::GatewayTimeout(_) => "gateway_timeout",
            StoreError::NoSuchUpload(_) => "no_such_upload",
            StoreError::InsufficientStorage(_) => "insufficient_storage",
            StoreError::Service { .. } => "service",
            StoreError::Request(_) => "request",
            StoreError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Part reference sent with CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Subset of HeadObject the uploader relies on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Content length, when the store reported one
    pub size: Option<u64>,
    pub etag: Option<String>,
}

/// Multipart-capable object store.
///
/// Handles are immutable: a different timeout means a different handle,
/// obtained through [`ObjectStore::with_timeout`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload, returning its upload id
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, StoreError>;

    /// Upload one part, returning the ETag the store assigned to it
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StoreError>;

    /// Part numbers the store currently holds for the upload, across all pages
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<u32>, StoreError>;

    /// Merge the given parts (ascending part number) into the final object
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, StoreError>;

    /// A new handle to the same store whose requests use `timeout` for both
    /// connecting and reading.
    fn with_timeout(&self, timeout: Duration) -> Arc<dyn ObjectStore>;
}
