//! Error types for server startup and the listener.

use thiserror::Error;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Error variants for server startup and the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file did not parse.
    #[error("config: {0}")]
    Config(#[from] serde_json::Error),

    /// Certificate or key material was unusable.
    #[error("TLS: {reason}")]
    Tls {
        /// Description of the failure.
        reason: String,
    },

    /// No configured NTP host yielded the time.
    #[error("ntp not available")]
    NtpUnavailable,
}
