//! # Stowage Core
//!
//! Chunked transfer engine for remote blob storage.
//!
//! This crate provides:
//! - A keyed registry of in-flight uploads and downloads
//! - The chunk producer (upload) and consumer (download) state machine
//! - The [`StorageBackend`] contract a remote store implements to drive transfers
//! - Error types and progress snapshots
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ChunkedTransferEngine                       │
//! │   (name -> Transfer registry, exactly-once completion)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Transfer                                 │
//! │   (buffer, announced size, cursor, state)                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                StorageBackend + TransferDriver                   │
//! │   (remote store pulling/pushing chunks through callbacks)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Starting a transfer under a name that is already in flight cancels the
//! previous transfer. Each started transfer reports its outcome exactly once
//! through its completion callback.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod engine;
pub mod error;
pub mod progress;
pub mod transfer;

pub use backend::{
    FileMetadata, ListCallback, StatusCallback, StorageBackend, TransferDriver, TransferRequest,
};
pub use engine::{ChunkedTransferEngine, EngineConfig, ReadOutcome, TransferOptions};
pub use error::{BackendError, EngineError, TransferError};
pub use progress::TransferProgress;
pub use transfer::{
    Completion, CompletionFn, Direction, ProducedChunk, ProgressFn, TransferId, TransferState,
};

/// Default chunk size (4 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Largest chunk size a transfer may request (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default per-file ceiling in bytes
pub const MAX_FILE_SIZE: u64 = 200_000_000;
