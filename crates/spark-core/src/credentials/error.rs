use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the credentials manager and the OAuth grant client.
///
/// Cloneable so that every caller waiting on a shared refresh or downscope
/// receives the same outcome.
#[derive(Debug, Clone, Error)]
pub enum CredentialsError {
    #[error(transparent)]
    Config(Arc<ConfigError>),
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("serialization error: {0}")]
    Serde(Arc<serde_json::Error>),
    #[error("HTTP error: {0}")]
    Http(Arc<reqwest::Error>),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },
    #[error("grant rejected ({code}): {description}")]
    Grant { code: String, description: String },
    #[error("current state cannot produce an access token")]
    NotAuthorizable,
    #[error("cannot downscope an empty access token")]
    EmptyAccessToken,
    #[error("token refresh unavailable")]
    RefreshUnavailable,
    #[error("new token matches current token")]
    UnchangedToken,
    #[error("JWT refresh callback failed: {0}")]
    JwtCallback(String),
    #[error("unable to extract an organisation id from the access token")]
    OrgIdUnavailable,
}

impl CredentialsError {
    /// Grant error code, if the token endpoint returned a structured OAuth error.
    pub fn grant_code(&self) -> Option<&str> {
        match self {
            CredentialsError::Grant { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<ConfigError> for CredentialsError {
    fn from(err: ConfigError) -> Self {
        CredentialsError::Config(Arc::new(err))
    }
}

impl From<std::io::Error> for CredentialsError {
    fn from(err: std::io::Error) -> Self {
        CredentialsError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for CredentialsError {
    fn from(err: serde_json::Error) -> Self {
        CredentialsError::Serde(Arc::new(err))
    }
}

impl From<reqwest::Error> for CredentialsError {
    fn from(err: reqwest::Error) -> Self {
        CredentialsError::Http(Arc::new(err))
    }
}
