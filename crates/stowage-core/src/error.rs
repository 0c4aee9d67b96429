//! Error types for the Stowage transfer engine.
//!
//! Errors fall into three groups:
//!
//! - [`TransferError`]: failures local to one transfer. They are never
//!   returned from an engine call; they are delivered exactly once through
//!   the transfer's completion callback.
//! - [`EngineError`]: contract violations by the caller (empty name, bad
//!   chunk size). These are returned from `start_upload`/`start_download`
//!   and nothing is registered.
//! - [`BackendError`]: result codes reported by the remote storage
//!   collaborator.

use crate::transfer::Direction;
use std::borrow::Cow;
use thiserror::Error;

/// Failure of a single transfer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The collaborator delivered a chunk without a payload
    #[error("invalid chunk payload: data pointer is null")]
    DataError,

    /// More bytes arrived than the collaborator announced
    #[error("received more data than announced: {received} > {announced} bytes")]
    Overflow {
        /// Bytes received including the offending chunk
        received: u64,
        /// Announced total size
        announced: u64,
    },

    /// The last chunk arrived before the announced total was reached
    #[error("expected more data, file may be corrupted: {received} of {expected} bytes")]
    Incomplete {
        /// Bytes received
        received: u64,
        /// Announced total size
        expected: u64,
    },

    /// A producer/consumer call hit a transfer of the other direction
    #[error("direction mismatch: expected {expected} transfer, found {actual}")]
    DirectionMismatch {
        /// Direction the call operates on
        expected: Direction,
        /// Direction of the registered transfer
        actual: Direction,
    },

    /// No transfer is registered under the name
    #[error("transfer not found: {0}")]
    NotFound(String),

    /// A later chunk announced a different total size than the first one
    #[error("announced size changed mid-transfer: {announced} != {expected} bytes")]
    SizeChanged {
        /// Size announced by the offending chunk
        announced: u64,
        /// Size fixed by the first chunk
        expected: u64,
    },

    /// The blob exceeds the configured per-file ceiling
    #[error("file too large: {size} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Announced or supplied size
        size: u64,
        /// Configured ceiling
        max: u64,
    },

    /// The transfer was cancelled or replaced
    #[error("transfer cancelled")]
    Cancelled,

    /// The collaborator reported a failure
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl TransferError {
    /// Returns true if the error was caused by the shape of the delivered data
    /// (null payload, size mismatches) rather than by the caller or backend
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            TransferError::DataError
                | TransferError::Overflow { .. }
                | TransferError::Incomplete { .. }
                | TransferError::SizeChanged { .. }
                | TransferError::TooLarge { .. }
        )
    }

    /// Returns true if the transfer ended because it was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TransferError::Cancelled | TransferError::Backend(BackendError::Cancelled)
        )
    }
}

/// Invalid use of the engine API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Transfer names must be non-empty
    #[error("transfer name must not be empty")]
    EmptyName,

    /// Chunk size outside `1..=max`
    #[error("invalid chunk size {size}: must be between 1 and {max} bytes")]
    InvalidChunkSize {
        /// Requested chunk size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Upload payload exceeds the per-file ceiling
    #[error("upload of {size} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Payload size
        size: u64,
        /// Configured ceiling
        max: u64,
    },
}

/// Result codes reported by a storage backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The remote blob does not exist
    #[error("remote file not found: {0}")]
    NotFound(String),

    /// The backend refuses the blob name
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// The backend rejected the request
    #[error("request rejected: {0}")]
    Rejected(Cow<'static, str>),

    /// The backend could not be reached or has shut down
    #[error("backend unavailable: {0}")]
    Unavailable(Cow<'static, str>),

    /// Storage I/O failed on the backend side
    #[error("storage I/O error: {0}")]
    Io(String),

    /// The request was cancelled on the backend side
    #[error("request cancelled")]
    Cancelled,
}

impl BackendError {
    /// Create a rejection with static context (zero allocation)
    #[must_use]
    pub const fn rejected(context: &'static str) -> Self {
        BackendError::Rejected(Cow::Borrowed(context))
    }

    /// Create an unavailable error with static context (zero allocation)
    #[must_use]
    pub const fn unavailable(context: &'static str) -> Self {
        BackendError::Unavailable(Cow::Borrowed(context))
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            BackendError::NotFound(err.to_string())
        } else {
            BackendError::Io(err.to_string())
        }
    }
}

/// Result type for engine calls that can violate the API contract
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_errors() {
        assert!(TransferError::DataError.is_data_error());
        assert!(
            TransferError::Overflow {
                received: 6,
                announced: 5
            }
            .is_data_error()
        );
        assert!(
            TransferError::Incomplete {
                received: 3,
                expected: 5
            }
            .is_data_error()
        );
        assert!(!TransferError::Cancelled.is_data_error());
        assert!(!TransferError::NotFound("a".into()).is_data_error());
        assert!(!TransferError::Backend(BackendError::rejected("quota")).is_data_error());
    }

    #[test]
    fn test_cancelled() {
        assert!(TransferError::Cancelled.is_cancelled());
        assert!(TransferError::Backend(BackendError::Cancelled).is_cancelled());
        assert!(!TransferError::DataError.is_cancelled());
    }

    #[test]
    fn test_error_display() {
        let err = TransferError::Overflow {
            received: 7,
            announced: 5,
        };
        assert!(err.to_string().contains("more data than announced"));

        let err = TransferError::DirectionMismatch {
            expected: Direction::Download,
            actual: Direction::Upload,
        };
        assert_eq!(
            err.to_string(),
            "direction mismatch: expected download transfer, found upload"
        );

        let err = EngineError::InvalidChunkSize { size: 0, max: 4096 };
        assert!(err.to_string().contains("between 1 and 4096"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(BackendError::from(io_err), BackendError::NotFound(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(BackendError::from(io_err), BackendError::Io(_)));
    }

    #[test]
    fn test_backend_into_transfer_error() {
        let err: TransferError = BackendError::NotFound("save1".into()).into();
        assert!(matches!(err, TransferError::Backend(BackendError::NotFound(_))));
    }
}
