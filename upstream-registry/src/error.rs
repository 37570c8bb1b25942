//! Registry errors

use thiserror::Error;
use upstream_config::ConfigError;

/// Errors raised by registry clients and the backend facade.
///
/// Watch and registration loops absorb these (log and retry); only
/// construction-time failures reach callers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Registry returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Inconsistent registry response: {0}")]
    Inconsistent(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Deregistration failed: {0}")]
    DeregistrationFailed(String),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Registration supervisor for {0} has stopped")]
    SupervisorStopped(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
