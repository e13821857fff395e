use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecpollError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("File search API error: {0}")]
    Api(#[from] ApiError),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Error returned by the external file-search API.
///
/// Carries the HTTP status when the failure came from a response, so the
/// retry policy and the circuit breaker can tell transient from permanent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

const TRANSIENT_STATUSES: &[u16] = &[429, 500, 502, 503];

const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "overloaded",
    "temporarily unavailable",
];

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Error without an HTTP status (transport failure, decode failure).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Quota exhaustion (403 "quota exceeded") is permanent until the quota
    /// resets and is deliberately not transient.
    pub fn is_transient(&self) -> bool {
        if let Some(status) = self.status {
            if TRANSIENT_STATUSES.contains(&status) {
                return true;
            }
        }
        let message = self.message.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Processor request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Processor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Processor is not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, RecpollError>;
