//! Error types for the message store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client stream ended before delivering its declared payload.
    #[error("stream ended {got} bytes into a declared {wanted}")]
    UnexpectedEof {
        /// Bytes the header declared.
        wanted: u64,
        /// Bytes actually received.
        got: u64,
    },

    /// The persisted NEXTID file is not a 16-hex-digit counter.
    #[error("corrupt NEXTID file: {content:?}")]
    NextIdCorrupt {
        /// The file content found.
        content: String,
    },
}
