//! Error types for the engine.

use hierperms_core::PermsError;
use hierperms_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
///
/// A denied permission check is never an error; it is `false`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An administrative operation was rejected.
    #[error("permission model error: {0}")]
    Perms(#[from] PermsError),

    /// The persistence collaborator failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// The rejected operation's error, if that is what this is.
    pub fn as_perms(&self) -> Option<&PermsError> {
        match self {
            EngineError::Perms(e) => Some(e),
            EngineError::Store(_) => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
