//! Tenacious Uploadr - resilient multipart uploader
//!
//! Uploads one large file to an S3-compatible store, riding out proxy and
//! client timeouts during slow part merges.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tenacious_uploadr::config::{Config, ConfigLoader};
use tenacious_uploadr::logging::{self, LogFormat};
use tenacious_uploadr::metrics;
use tenacious_uploadr::s3::{S3Client, S3ClientConfig};
use tenacious_uploadr::upload::UploadDriver;
use tracing::info;

/// Tenacious Uploadr - multipart upload that survives slow completes
#[derive(Parser, Debug)]
#[command(name = "tenacious-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target bucket
    #[arg(short, long)]
    bucket: Option<String>,

    /// Object key
    #[arg(short, long)]
    key: Option<String>,

    /// Local file to upload
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Part size in bytes [default: 52428800]
    #[arg(short = 'c', long)]
    chunk_size: Option<u64>,

    /// Access key id
    #[arg(short, long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key: Option<String>,

    /// Secret access key
    #[arg(short, long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Session token for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    session_token: Option<String>,

    /// Endpoint URL of an S3-compatible store
    #[arg(short, long, env = "S3_ENDPOINT")]
    endpoint: Option<String>,

    /// Region [default: us-east-1]
    #[arg(short, long, env = "S3_REGION")]
    region: Option<String>,

    /// Attempts per call, also used as the completion attempt budget [default: 5]
    #[arg(short, long, env = "MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Parts uploaded in parallel [default: 4]
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Connect/read timeout in seconds for ordinary requests [default: 60]
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Only log warnings and errors, even when RUST_LOG is set
    #[arg(short, long)]
    quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Optional YAML configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write Prometheus metrics in text format to this path on exit
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        let upload = &mut config.upload;
        if let Some(bucket) = self.bucket {
            upload.bucket = bucket;
        }
        if let Some(key) = self.key {
            upload.key = key;
        }
        if let Some(file) = self.file {
            upload.file = file;
        }
        if let Some(part_size) = self.chunk_size {
            upload.part_size = part_size;
        }
        if let Some(max_retries) = self.max_retries {
            upload.max_retries = max_retries;
        }
        if let Some(concurrency) = self.concurrency {
            upload.concurrency = concurrency;
        }

        let s3 = &mut config.s3;
        if let Some(region) = self.region {
            s3.region = region;
        }
        if self.endpoint.is_some() {
            s3.endpoint = self.endpoint;
        }
        if self.access_key.is_some() {
            s3.access_key = self.access_key;
        }
        if self.secret_key.is_some() {
            s3.secret_key = self.secret_key;
        }
        if self.session_token.is_some() {
            s3.session_token = self.session_token;
        }
        if let Some(secs) = self.request_timeout {
            s3.request_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(args.quiet, args.log_format)?;

    info!("Starting Tenacious Uploadr v{}", tenacious_uploadr::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            let config = ConfigLoader::load(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };

    let metrics_file = args.metrics_file.clone();
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let client = S3Client::new(S3ClientConfig::from_config(
        &config.s3,
        config.upload.max_retries,
    ))
    .context("failed to build S3 client")?;

    let result = UploadDriver::new(Arc::new(client), config.upload)
        .run()
        .await;

    if let Some(path) = metrics_file {
        if let Err(e) = metrics::write_textfile(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write metrics file");
        }
    }

    result?;
    Ok(())
}
