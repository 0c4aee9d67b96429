//! Remote storage collaborator contract.
//!
//! The engine does not move bytes itself. A [`StorageBackend`] is told to
//! begin a transfer and then drives it by calling back through the
//! [`TransferDriver`] it was handed:
//!
//! ```text
//! Engine                              Backend
//!   |                                    |
//!   |-- begin_upload(request, driver) -->|
//!   |<-- driver.produce_chunk() ---------|  (repeat until is_done)
//!   |<-- driver.report_progress() -------|  (any time)
//!   |<-- driver.finish(status) ----------|  (once)
//!   |                                    |
//!   |-- begin_download(request, driver)->|
//!   |<-- driver.consume_chunk(..) -------|  (repeat until last chunk)
//!   |<-- driver.report_progress() -------|
//!   |<-- driver.finish(status) ----------|
//!   |                                    |
//!   |-- cancel(request) ---------------->|  (fire-and-forget)
//! ```
//!
//! Callbacks may arrive on any thread, including re-entrantly from inside
//! `begin_upload`/`begin_download`.

use crate::engine::{ChunkedTransferEngine, ReadOutcome};
use crate::error::BackendError;
use crate::transfer::{Direction, ProducedChunk, TransferId};
use std::sync::Arc;

/// Callback for a file list query
pub type ListCallback = Box<dyn FnOnce(Result<Vec<FileMetadata>, BackendError>) + Send>;

/// Callback for operations that only report a status
pub type StatusCallback = Box<dyn FnOnce(Result<(), BackendError>) + Send>;

/// Metadata of a remote blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Blob name
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Description of a started transfer, given to the backend and returned to
/// the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Remote blob name
    pub name: String,
    /// Generation token of this transfer
    pub id: TransferId,
    /// Transfer direction
    pub direction: Direction,
    /// Chunk size (exact for uploads, a hint for downloads)
    pub chunk_size: usize,
    /// Upload size; downloads learn theirs from the store
    pub size: Option<u64>,
}

/// Remote object store driving chunked transfers
pub trait StorageBackend: Send + Sync {
    /// Start writing `request.name`, pulling bytes through `driver`
    ///
    /// # Errors
    ///
    /// Returns an error if the write could not be started; the engine then
    /// fails the transfer with that error.
    fn begin_upload(
        &self,
        request: &TransferRequest,
        driver: TransferDriver,
    ) -> Result<(), BackendError>;

    /// Start reading `request.name`, pushing bytes through `driver`
    ///
    /// # Errors
    ///
    /// Returns an error if the read could not be started; the engine then
    /// fails the transfer with that error.
    fn begin_download(
        &self,
        request: &TransferRequest,
        driver: TransferDriver,
    ) -> Result<(), BackendError>;

    /// Stop a running transfer. Best effort: chunk callbacks already in
    /// flight may still arrive and are ignored by the engine.
    fn cancel(&self, request: &TransferRequest);

    /// List the blobs in the store
    fn query_file_list(&self, done: ListCallback);

    /// Delete a blob
    fn delete_file(&self, name: &str, done: StatusCallback);

    /// Copy a blob under a new name
    fn duplicate_file(&self, source: &str, destination: &str, done: StatusCallback);
}

/// Per-transfer callback context handed to the backend.
///
/// Calls made through a driver only reach the transfer it was created for.
/// Once that transfer has been cancelled, replaced or finished, every call
/// is an orphan: it returns a terminal answer and mutates nothing.
#[derive(Clone)]
pub struct TransferDriver {
    engine: Arc<ChunkedTransferEngine>,
    request: TransferRequest,
}

impl TransferDriver {
    pub(crate) fn new(engine: Arc<ChunkedTransferEngine>, request: TransferRequest) -> Self {
        Self { engine, request }
    }

    /// The request this driver belongs to
    #[must_use]
    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// Pull the next upload chunk
    #[must_use]
    pub fn produce_chunk(&self) -> ProducedChunk {
        self.engine
            .produce_chunk_for(&self.request.name, Some(self.request.id))
    }

    /// Push the next download chunk; `None` models a null payload
    #[must_use]
    pub fn consume_chunk(
        &self,
        data: Option<&[u8]>,
        announced_total: u64,
        is_last: bool,
    ) -> ReadOutcome {
        self.engine.consume_chunk_for(
            &self.request.name,
            Some(self.request.id),
            data,
            announced_total,
            is_last,
        )
    }

    /// Forward a progress report
    pub fn report_progress(&self, bytes_transferred: u64, total_bytes: u64) {
        self.engine.report_progress_for(
            &self.request.name,
            Some(self.request.id),
            bytes_transferred,
            total_bytes,
        );
    }

    /// Report the final status. Returns true if this call settled the transfer.
    pub fn finish(&self, status: Result<(), BackendError>) -> bool {
        self.engine
            .finish_for(&self.request.name, Some(self.request.id), status)
    }

    /// Check whether the transfer is still registered under this driver's id
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.engine
            .progress(&self.request.name)
            .is_some_and(|p| p.id == self.request.id)
    }
}

impl std::fmt::Debug for TransferDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferDriver")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
