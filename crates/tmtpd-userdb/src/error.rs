//! Error types for the user directory.

use thiserror::Error;

/// Result type alias for directory operations.
pub type UserDbResult<T> = Result<T, UserDbError>;

/// Error variants for directory operations.
///
/// Variants other than `Io`, `Serialize`, and `Checksum` map one-to-one
/// onto the content failures a client can trigger; their messages travel
/// in ack `error` fields.
#[derive(Debug, Error)]
pub enum UserDbError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed.
    #[error("record serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A record file failed its CRC or did not parse.
    #[error("checksum failed for {0}")]
    Checksum(String),

    /// A caller-supplied value is unusable.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The uid exists but does not carry the presented node.
    #[error("uid {uid} exists without node {node}")]
    MissingNode {
        /// The existing uid.
        uid: String,
        /// The node that was expected on it.
        node: String,
    },

    /// No such uid.
    #[error("unknown uid {0}")]
    UserInvalid(String),

    /// The user already has the maximum number of nodes.
    #[error("node limit reached for uid {0}")]
    MaxNodes(String),

    /// The node is unknown or defunct on this uid.
    #[error("invalid node for uid {0}")]
    NodeInvalid(String),

    /// Dropping the node would leave the user with none.
    #[error("cannot drop last node of uid {0}")]
    LastNode(String),

    /// No such alias.
    #[error("unknown alias {0}")]
    UnknownAlias(String),

    /// The alias or group id is owned elsewhere in the shared namespace.
    #[error("alias {0} already taken")]
    AliasTaken(String),

    /// The alias does not resolve to the required uid.
    #[error("alias {0} invalid here")]
    AliasInvalid(String),

    /// The invitee has already joined the group.
    #[error("alias {0} already joined")]
    MemberJoined(String),

    /// No such group.
    #[error("unknown group {0}")]
    GroupInvalid(String),
}
