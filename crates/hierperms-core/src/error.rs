//! Error types for hierperms core.

use thiserror::Error;

/// Errors returned by administrative operations on groups and users.
///
/// A denied permission check is never an error; it is a `false` result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermsError {
    /// The named group does not exist.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// A group with this name already exists.
    #[error("group already exists: {0}")]
    AlreadyExists(String),

    /// The group cannot be removed or altered in this way.
    #[error("group is protected: {0}")]
    Protected(String),

    /// The group name is not usable (empty).
    #[error("invalid group name: {0:?}")]
    InvalidName(String),

    /// Snapshot encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, PermsError>;
