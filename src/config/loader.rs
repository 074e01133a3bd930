//! Configuration loader with environment variable expansion

use super::{Config, ConfigError};
use lazy_static::lazy_static;
use regex_lite::Regex;
use std::path::Path;

lazy_static! {
    // ${VAR} or ${VAR:-default}
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("env var pattern is valid");
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read and parse a YAML file without validating it.
    ///
    /// Validation is left to the caller so command-line flags can fill in
    /// whatever the file leaves out.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse YAML text after environment expansion
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Expand environment variables.
    ///
    /// Supports two syntaxes:
    /// - `${VAR_NAME}` - keeps the placeholder if the variable is not set
    /// - `${VAR_NAME:-default}` - falls back to `default`
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |cap: &regex_lite::Captures<'_>| {
                match std::env::var(&cap[1]) {
                    Ok(value) => value,
                    Err(_) => match cap.get(2) {
                        Some(default) => default.as_str().to_string(),
                        None => cap[0].to_string(),
                    },
                }
            })
            .into_owned()
    }
}
