//! Error types for LedgerLink

use serde_json::Value;
use thiserror::Error;

/// Every failure a caller can observe from the client.
///
/// Remote failures are always structured: a discriminator plus a human
/// message. Transport exceptions never leak through as raw errors.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Connection lost before a response arrived")]
    Disconnected,
    #[error("Request timed out")]
    Timeout,
    #[error("Remote error: {error}{}", error_message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    Remote {
        error: String,
        error_message: Option<String>,
        remote: Value,
    },
    #[error("Unexpected response from remote: {0}")]
    Unexpected(String),
    #[error("{code}: {message}")]
    Local { code: String, message: String },
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("Server is not running stand-alone")]
    NotStandAlone,
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl RemoteError {
    pub fn local(code: &str, message: impl Into<String>) -> Self {
        RemoteError::Local {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Builds a `Remote` variant from an error response body.
    pub fn from_response(message: &Value) -> Self {
        RemoteError::Remote {
            error: message
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            error_message: message
                .get("error_message")
                .and_then(Value::as_str)
                .map(str::to_string),
            remote: message.clone(),
        }
    }

    /// Wire-style discriminator string for this error.
    pub fn discriminator(&self) -> &str {
        match self {
            RemoteError::Config(_) => "configError",
            RemoteError::Transport(_) => "transportError",
            RemoteError::Disconnected => "remoteDisconnected",
            RemoteError::Timeout => "timeout",
            RemoteError::Remote { .. } => "remoteError",
            RemoteError::Unexpected(_) => "remoteUnexpected",
            RemoteError::Local { code, .. } => code,
            RemoteError::InvalidIdentity(_) => "invalidIdentity",
            RemoteError::NotStandAlone => "notStandAlone",
            RemoteError::Crypto(_) => "cryptoError",
        }
    }

    /// The server-side `error` field, for `Remote` errors.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            RemoteError::Remote { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

impl From<toml::de::Error> for RemoteError {
    fn from(err: toml::de::Error) -> Self {
        RemoteError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, RemoteError>;
