//! Errors that can occur in service worker operations.

use thiserror::Error;

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, SwError>;

/// Errors raised by the worker or by one of its platform services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad response for {url}: status {status}")]
    BadResponse { url: String, status: u16 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl SwError {
    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a client error.
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Create a notification error.
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SwError::Network(_) => true,
            SwError::BadResponse { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get the error category for diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            SwError::Network(_) => "network",
            SwError::BadResponse { .. } => "bad_response",
            SwError::Cache(_) => "cache",
            SwError::QuotaExceeded(_) => "quota_exceeded",
            SwError::UnsupportedRequest(_) => "unsupported_request",
            SwError::Client(_) => "client",
            SwError::Notification(_) => "notification",
            SwError::Config(_) => "config",
            SwError::InvalidUrl(_) => "invalid_url",
            SwError::NotFound(_) => "not_found",
        }
    }
}

impl From<url::ParseError> for SwError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<reqwest::Error> for SwError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}
