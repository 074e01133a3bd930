//! Configuration module for Tenacious Uploadr
//!
//! Settings come from an optional YAML file (with environment variable
//! expansion, see [`ConfigLoader`]) and are then overridden by command-line
//! flags. [`Config::validate`] runs once all sources have been merged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Minimum part size (5 MiB) accepted by S3 for every part but the last
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub s3: S3Config,
}

impl Config {
    /// Load and validate configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = ConfigLoader::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let upload = &self.upload;

        if upload.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError("bucket must be set".into()));
        }

        if upload.key.trim().is_empty() {
            return Err(ConfigError::ValidationError("object key must be set".into()));
        }

        if upload.file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError("file path must be set".into()));
        }

        if upload.part_size == 0 {
            return Err(ConfigError::ValidationError(
                "part size must be greater than zero".into(),
            ));
        }

        if upload.part_size < MIN_PART_SIZE {
            tracing::warn!(
                part_size = upload.part_size,
                minimum = MIN_PART_SIZE,
                "Part size is below the S3 minimum; most stores will reject the upload"
            );
        }

        if upload.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max retries must be at least 1".into(),
            ));
        }

        if upload.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "concurrency must be at least 1".into(),
            ));
        }

        if self.s3.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("region must not be empty".into()));
        }

        if let Some(ref endpoint) = self.s3.endpoint {
            let endpoint = endpoint.trim();
            if endpoint.is_empty() {
                return Err(ConfigError::ValidationError(
                    "endpoint must not be empty when set".into(),
                ));
            }
            if endpoint.contains("://") && !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.s3.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// What to upload and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub file: PathBuf,
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            key: String::new(),
            file: PathBuf::new(),
            part_size: default_part_size(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_part_size() -> u64 {
    52428800 // 50MiB
}

fn default_max_retries() -> u32 {
    5
}

fn default_concurrency() -> usize {
    4
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Connect/read timeout for ordinary requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl S3Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}
