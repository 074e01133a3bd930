//! Logging setup
//!
//! One global subscriber: an `EnvFilter` feeding a fmt layer in either human
//! readable or JSON form. `--quiet` pins the filter to `warn`; otherwise
//! RUST_LOG wins when set.
//!
//! ```text
//! Registry
//!   ├── EnvFilter (warn when quiet, else RUST_LOG, else info)
//!   └── Fmt layer (text | json)
//! ```

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Logging errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter used when RUST_LOG is unset or quiet is requested
pub fn default_directive(quiet: bool) -> &'static str {
    if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Level filter for a run; quiet ignores RUST_LOG
pub fn build_filter(quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new(default_directive(true));
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(false)))
}

/// Install the global subscriber.
pub fn init(quiet: bool, format: LogFormat) -> Result<(), LoggingError> {
    let env_filter = build_filter(quiet);

    let result = match format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
