//! S3 Credentials Module
//!
//! Resolves the static key pair used to sign requests. Explicit values win;
//! otherwise the standard `AWS_*` environment variables are consulted. A run
//! without a usable key pair is a configuration error, never retried.
//!
//! # Example
//!
//! ```
//! use tenacious_uploadr::s3::CredentialsProvider;
//!
//! let creds =
//!     CredentialsProvider::from_parts(Some("access-key"), Some("secret-key"), None).unwrap();
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert_eq!(creds.secret_access_key(), "secret-key");
//! ```

use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Credentials for AWS authentication
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Create credentials with session token (for temporary credentials)
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: Some(session_token.into()),
        }
    }

    /// Get the access key ID
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Get the secret access key
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Get the session token (if any)
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

/// Factory methods for resolving credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    ///
    /// Looks for:
    /// - `AWS_ACCESS_KEY_ID`
    /// - `AWS_SECRET_ACCESS_KEY`
    /// - `AWS_SESSION_TOKEN` (optional)
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_ACCESS_KEY_ID not set".into())
        })?;

        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".into())
        })?;

        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Self::from_parts(Some(&access_key), Some(&secret_key), session_token.as_deref())
    }

    /// Build credentials from explicit values, falling back to the
    /// environment when neither key is given.
    pub fn from_parts(
        access_key: Option<&str>,
        secret_key: Option<&str>,
        session_token: Option<&str>,
    ) -> Result<Credentials, CredentialsError> {
        match (access_key, secret_key) {
            (None, None) => Self::from_env(),
            (Some(_), None) => Err(CredentialsError::MissingCredentials(
                "secret key not set".into(),
            )),
            (None, Some(_)) => Err(CredentialsError::MissingCredentials(
                "access key not set".into(),
            )),
            (Some(access), Some(secret)) => {
                if access.trim().is_empty() || secret.trim().is_empty() {
                    return Err(CredentialsError::InvalidCredentials(
                        "access key and secret key must not be empty".into(),
                    ));
                }

                Ok(match session_token.filter(|t| !t.is_empty()) {
                    Some(token) => Credentials::with_session_token(access, secret, token),
                    None => Credentials::new(access, secret),
                })
            }
        }
    }
}
