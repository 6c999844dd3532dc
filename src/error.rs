// Error handling module
// Defines the error type shared by the identity client and the request gateway

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by identity operations and gateway requests
#[derive(Error, Debug)]
pub enum AuthError {
    /// Server answered with a non-2xx status
    #[error("Request failed: {status} - {message}")]
    RequestFailed {
        message: String,
        status: u16,
        /// Decoded response body, kept for diagnostics
        body: Value,
    },

    /// Refresh was attempted without a stored refresh token
    #[error("Missing refresh token")]
    MissingRefreshToken,

    /// Refresh returned 2xx but no access token
    #[error("Refresh response did not contain a new access token")]
    MissingAccessToken,

    /// Caller cancelled the operation
    #[error("Request cancelled")]
    Cancelled,

    /// Network or protocol failure from the HTTP client
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response claimed JSON but did not parse
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// A header value could not be encoded
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl AuthError {
    /// HTTP status for server-side failures
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message, without the status prefix for server failures
    pub fn message(&self) -> String {
        match self {
            AuthError::RequestFailed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Raw decoded body of a failed response
    pub fn body(&self) -> Option<&Value> {
        match self {
            AuthError::RequestFailed { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Result type alias for identity and gateway operations
pub type Result<T> = std::result::Result<T, AuthError>;
