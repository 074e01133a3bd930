//! AWS SDK backed [`ObjectStore`]
//!
//! Every operation is instrumented with a span following the `s3.*` field
//! conventions:
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | CreateMultipartUpload | `s3.create_multipart_upload` | bucket, key, upload_id |
//! | UploadPart | `s3.upload_part` | bucket, upload_id, part_number, bytes, etag |
//! | ListParts | `s3.list_parts` | bucket, upload_id, parts_count |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` | bucket, upload_id, parts_count |
//! | HeadObject | `s3.head_object` | bucket, key, content_length |

use super::credentials::{CredentialsError, CredentialsProvider};
use super::{CompletedPart, ObjectMetadata, ObjectStore, StoreError};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default connect/read timeout for ordinary requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// S3 client construction errors
#[derive(Error, Debug)]
pub enum S3ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),
}

/// S3 Client configuration
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    /// Attempts for the SDK's own standard retry mode
    pub max_attempts: u32,
    /// Connect and read timeout applied to every request
    pub request_timeout: Duration,
}

impl S3ClientConfig {
    /// Client settings for the `s3` section; the SDK retries as often as the
    /// uploader does.
    pub fn from_config(config: &S3Config, max_attempts: u32) -> Self {
        Self {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            session_token: config.session_token.clone(),
            max_attempts,
            request_timeout: config.request_timeout(),
        }
    }
}

/// S3 Client
pub struct S3Client {
    client: Client,
    region: String,
    endpoint: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl S3Client {
    /// Create a new S3 client
    ///
    /// An explicit endpoint switches to path-style addressing, which is what
    /// S3-compatible gateways expect.
    pub fn new(config: S3ClientConfig) -> Result<Self, S3ClientError> {
        if config.region.trim().is_empty() {
            return Err(S3ClientError::ConfigError("region must not be empty".into()));
        }

        let credentials = CredentialsProvider::from_parts(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            config.session_token.as_deref(),
        )?;

        let sdk_credentials = aws_sdk_s3::config::Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token().map(str::to_string),
            None,
            "tenacious-uploadr",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(sdk_credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)))
            .timeout_config(request_timeouts(config.request_timeout));

        let endpoint = config.endpoint.as_deref().map(normalize_endpoint);
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            region: config.region,
            endpoint,
            timeout: config.request_timeout,
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.region))
    }

    /// Connect/read timeout carried by this handle
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same store, same credentials, different request timeout
    pub fn rebuild_with_timeout(&self, timeout: Duration) -> Self {
        let conf = self
            .client
            .config()
            .to_builder()
            .timeout_config(request_timeouts(timeout))
            .build();

        Self {
            client: Client::from_conf(conf),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            timeout,
        }
    }
}

fn request_timeouts(timeout: Duration) -> TimeoutConfig {
    TimeoutConfig::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
}

/// Prepend `http://` to bare `host:port` endpoints.
fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

fn sdk_part_number(part_number: u32) -> Result<i32, StoreError> {
    i32::try_from(part_number)
        .map_err(|_| StoreError::Request(format!("part number {} out of range", part_number)))
}

/// Map an SDK failure onto the uploader's error classes.
fn classify<E>(err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => StoreError::Timeout(message),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => StoreError::Timeout(message),
        SdkError::ServiceError(service_err) => StoreError::from_status(
            service_err.raw().status().as_u16(),
            service_err.err().code(),
            message,
        ),
        SdkError::ResponseError(response_err) => {
            StoreError::from_status(response_err.raw().status().as_u16(), None, message)
        }
        _ => StoreError::Request(message),
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| {
                StoreError::InvalidResponse("CreateMultipartUpload without UploadId".into())
            })?
            .to_string();

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        Ok(upload_id)
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, key, body),
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(sdk_part_number(part_number)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify)?;

        let etag = output
            .e_tag()
            .ok_or_else(|| {
                StoreError::InvalidResponse(format!("UploadPart {} without ETag", part_number))
            })?
            .to_string();

        tracing::Span::current().record("s3.etag", etag.as_str());
        Ok(etag)
    }

    #[tracing::instrument(
        name = "s3.list_parts",
        skip(self, key),
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            parts_count = tracing::field::Empty
        ),
        err
    )]
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<u32>, StoreError> {
        let mut pages = self
            .client
            .list_parts()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .into_paginator()
            .send();

        let mut part_numbers = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(classify)?;
            part_numbers.extend(
                page.parts()
                    .iter()
                    .filter_map(|part| part.part_number())
                    .filter_map(|n| u32::try_from(n).ok()),
            );
        }

        tracing::Span::current().record("parts_count", part_numbers.len());
        Ok(part_numbers)
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, key, parts),
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            parts_count = parts.len(),
            timeout_secs = self.timeout.as_secs()
        ),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        let sdk_parts = parts
            .iter()
            .map(|part| {
                Ok(SdkCompletedPart::builder()
                    .part_number(sdk_part_number(part.part_number)?)
                    .e_tag(&part.etag)
                    .build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(sdk_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    #[tracing::instrument(
        name = "s3.head_object",
        skip(self),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            content_length = tracing::field::Empty
        ),
        err
    )]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;

        let size = output.content_length().and_then(|len| u64::try_from(len).ok());
        if let Some(size) = size {
            tracing::Span::current().record("content_length", size);
        }

        Ok(ObjectMetadata {
            size,
            etag: output.e_tag().map(str::to_string),
        })
    }

    fn with_timeout(&self, timeout: Duration) -> Arc<dyn ObjectStore> {
        Arc::new(self.rebuild_with_timeout(timeout))
    }
}
