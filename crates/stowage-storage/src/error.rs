//! Error types for the storage service.

use stowage_core::{BackendError, EngineError, TransferError};
use thiserror::Error;

/// Storage service errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The transfer could not be started
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The transfer ran and failed
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A list/delete/duplicate request failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The transfer did not finish before the configured deadline
    #[error("transfer timed out: {0}")]
    Timeout(String),

    /// The completion was dropped without being delivered
    #[error("completion channel closed")]
    ChannelClosed,
}

impl StorageError {
    /// Returns true if the remote blob does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::Backend(BackendError::NotFound(_))
                | StorageError::Transfer(TransferError::Backend(BackendError::NotFound(_)))
                | StorageError::Transfer(TransferError::NotFound(_))
        )
    }

    /// Returns true if the transfer was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            StorageError::Transfer(err) => err.is_cancelled(),
            StorageError::Backend(BackendError::Cancelled) => true,
            _ => false,
        }
    }
}

/// Result type for storage service operations
pub type Result<T> = std::result::Result<T, StorageError>;
