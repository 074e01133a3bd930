//! Tenacious Uploadr Library
//!
//! Multipart uploads of very large files to S3-compatible stores that are slow
//! to merge parts.
//!
//! # Features
//!
//! - **Concurrent Parts**: Fixed-width worker pool, every part retried on its own
//! - **Proxy Tolerant**: HTTP 524 and client timeouts are retried with backoff
//! - **Out-of-band Completion**: A timed out CompleteMultipartUpload is
//!   confirmed with HeadObject instead of being resent blindly
//! - **Verified**: Success means the remote size matches the local file
//! - **Resumable by Hand**: Failed runs report their upload id and never abort it
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tenacious_uploadr::config::Config;
//! use tenacious_uploadr::s3::{S3Client, S3ClientConfig};
//! use tenacious_uploadr::upload::UploadDriver;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("uploadr.yaml")?;
//!     let client_config = S3ClientConfig::from_config(&config.s3, config.upload.max_retries);
//!     let client = S3Client::new(client_config)?;
//!     let report = UploadDriver::new(Arc::new(client), config.upload).run().await?;
//!     println!("uploaded {} bytes in {} parts", report.bytes, report.parts);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod s3;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{UploadDriver, UploadFailure, UploadReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
