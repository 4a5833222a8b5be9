//! Error types for the protocol layer.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Error variants for framing and identifier handling.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The 4-hex-digit length prefix is malformed or out of range.
    #[error("invalid header length")]
    LengthBad,

    /// The JSON header failed to parse or failed its field template.
    #[error("invalid header")]
    HeaderBad,

    /// A base32 value contains characters outside the alphabet or has a
    /// truncated final group.
    #[error("corrupt base32 value")]
    Base32Bad,

    /// A header serialized to more than the frame format can carry.
    #[error("header exceeds frame length limit: {len} bytes")]
    HeaderTooLong {
        /// Serialized header length in bytes.
        len: usize,
    },

    /// An escaped on-disk name contains an invalid percent sequence.
    #[error("invalid escape sequence in name: {name}")]
    EscapeBad {
        /// The offending name.
        name: String,
    },

    /// Header serialization failed.
    #[error("header serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}
