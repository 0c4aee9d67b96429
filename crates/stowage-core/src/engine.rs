//! Chunked transfer engine
//!
//! The engine keeps a registry of in-flight transfers keyed by blob name and
//! answers the backend's chunk callbacks against it. Completion is reported
//! exactly once per transfer: the entry is removed from the registry in the
//! same step that takes its completion callback, so whichever path (data
//! error, final status, cancellation, replacement) removes it first is the
//! only one that notifies.
//!
//! # Locking
//!
//! Each operation holds one registry entry guard while it mutates the
//! transfer, then releases it before calling the backend or any user
//! callback. Callbacks may therefore re-enter the engine from any thread.

use crate::backend::{StorageBackend, TransferDriver, TransferRequest};
use crate::error::{BackendError, EngineError, Result, TransferError};
use crate::progress::TransferProgress;
use crate::transfer::{
    Completion, Direction, ProducedChunk, ProgressFn, Transfer, TransferId, TransferState,
};
use crate::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_FILE_SIZE};
use dashmap::DashMap;
use std::sync::Arc;

/// Answer to a download chunk callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Keep sending chunks
    Continue,
    /// Abort the read, the transfer has failed
    Fail,
    /// Abort the read, no transfer wants these bytes
    Cancel,
}

/// Engine-wide limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Chunk size used when a transfer does not pick one
    pub default_chunk_size: usize,
    /// Largest accepted chunk size
    pub max_chunk_size: usize,
    /// Largest accepted blob
    pub max_file_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidChunkSize`] if the default chunk size is
    /// zero or above the maximum.
    pub fn validate(&self) -> Result<()> {
        if self.default_chunk_size == 0 || self.default_chunk_size > self.max_chunk_size {
            return Err(EngineError::InvalidChunkSize {
                size: self.default_chunk_size,
                max: self.max_chunk_size,
            });
        }
        Ok(())
    }
}

/// Per-transfer options
#[derive(Clone, Default)]
pub struct TransferOptions {
    chunk_size: Option<usize>,
    on_progress: Option<ProgressFn>,
}

impl TransferOptions {
    /// Options with engine defaults and no progress callback
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific chunk size
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Receive progress fractions reported by the backend
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOptions")
            .field("chunk_size", &self.chunk_size)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Registry and state machine driver for chunked blob transfers
pub struct ChunkedTransferEngine {
    /// In-flight transfers (name -> transfer)
    transfers: DashMap<String, Transfer>,

    /// Remote store driving the transfers
    backend: Arc<dyn StorageBackend>,

    config: EngineConfig,
}

impl ChunkedTransferEngine {
    /// Create an engine on top of `backend`
    pub fn new(backend: Arc<dyn StorageBackend>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            transfers: DashMap::new(),
            backend,
            config,
        })
    }

    /// Engine limits
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Backend the engine drives
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Start uploading `data` as `name`.
    ///
    /// Any transfer already registered under `name` is cancelled first.
    /// `on_complete` fires exactly once, possibly before this call returns if
    /// the backend drives the transfer synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error, without registering anything, if `name` is empty,
    /// the chunk size is out of range or `data` exceeds the file size limit.
    pub fn start_upload<F>(
        self: &Arc<Self>,
        name: impl Into<String>,
        data: Vec<u8>,
        options: TransferOptions,
        on_complete: F,
    ) -> Result<TransferRequest>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let name = name.into();
        let chunk_size = self.resolve_chunk_size(&name, &options)?;

        let size = data.len() as u64;
        if size > self.config.max_file_size {
            return Err(EngineError::TooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        tracing::debug!(
            "Starting upload of {} ({} bytes, chunk_size={})",
            name,
            size,
            chunk_size
        );

        let transfer = Transfer::new_upload(
            TransferId::next(),
            name,
            data,
            chunk_size,
            self.config.max_file_size,
        )
        .with_callbacks(options.on_progress, Box::new(on_complete));

        Ok(self.launch(transfer))
    }

    /// Start downloading `name`. The size is learned from the first chunk.
    ///
    /// # Errors
    ///
    /// Returns an error, without registering anything, if `name` is empty or
    /// the chunk size hint is out of range.
    pub fn start_download<F>(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: TransferOptions,
        on_complete: F,
    ) -> Result<TransferRequest>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let name = name.into();
        let chunk_size = self.resolve_chunk_size(&name, &options)?;

        tracing::debug!("Starting download of {} (chunk_size={})", name, chunk_size);

        let transfer = Transfer::new_download(
            TransferId::next(),
            name,
            chunk_size,
            self.config.max_file_size,
        )
        .with_callbacks(options.on_progress, Box::new(on_complete));

        Ok(self.launch(transfer))
    }

    /// Pull the next upload chunk for `name`.
    ///
    /// Unknown names and finished uploads yield an empty terminal chunk.
    #[must_use]
    pub fn produce_chunk(&self, name: &str) -> ProducedChunk {
        self.produce_chunk_for(name, None)
    }

    /// Push a download chunk for `name`; `None` models a null payload.
    #[must_use]
    pub fn consume_chunk(
        &self,
        name: &str,
        data: Option<&[u8]>,
        announced_total: u64,
        is_last: bool,
    ) -> ReadOutcome {
        self.consume_chunk_for(name, None, data, announced_total, is_last)
    }

    /// Forward a backend progress report to the transfer's progress callback
    pub fn report_progress(&self, name: &str, bytes_transferred: u64, total_bytes: u64) {
        self.report_progress_for(name, None, bytes_transferred, total_bytes);
    }

    /// Apply the backend's final status and notify.
    ///
    /// Returns true if this call settled the transfer, false if the name was
    /// an orphan.
    pub fn finish(&self, name: &str, status: std::result::Result<(), BackendError>) -> bool {
        self.finish_for(name, None, status)
    }

    /// Cancel the transfer registered under `name`.
    ///
    /// The backend is asked to stop and the completion fires with
    /// [`TransferError::Cancelled`]. Returns false if nothing was registered.
    pub fn cancel_transfer(&self, name: &str) -> bool {
        match self.transfers.remove(name) {
            Some((_, transfer)) => {
                self.cancel_removed(transfer);
                true
            }
            None => false,
        }
    }

    /// Cancel the transfer `request` describes, if it is still registered.
    ///
    /// Unlike [`cancel_transfer`](Self::cancel_transfer) this leaves a newer
    /// transfer under the same name alone.
    pub fn cancel_request(&self, request: &TransferRequest) -> bool {
        match self
            .transfers
            .remove_if(&request.name, |_, transfer| transfer.id == request.id)
        {
            Some((_, transfer)) => {
                self.cancel_removed(transfer);
                true
            }
            None => false,
        }
    }

    /// Cancel every registered transfer, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let names: Vec<String> = self
            .transfers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        names
            .iter()
            .filter(|name| self.cancel_transfer(name))
            .count()
    }

    /// Progress snapshot of the transfer registered under `name`
    #[must_use]
    pub fn progress(&self, name: &str) -> Option<TransferProgress> {
        self.transfers.get(name).map(|entry| entry.snapshot())
    }

    /// State of the transfer registered under `name`
    #[must_use]
    pub fn state(&self, name: &str) -> Option<TransferState> {
        self.transfers.get(name).map(|entry| entry.state())
    }

    /// Names of all registered transfers
    #[must_use]
    pub fn active_transfers(&self) -> Vec<String> {
        self.transfers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered transfers
    #[must_use]
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    // ---------------------------------------------------------------------
    // Driver entry points. `id` pins the call to one generation of `name`.
    // ---------------------------------------------------------------------

    pub(crate) fn produce_chunk_for(&self, name: &str, id: Option<TransferId>) -> ProducedChunk {
        let chunk = self.with_transfer(name, id, |transfer| match transfer.produce() {
            Ok(chunk) => {
                tracing::trace!(
                    "Produced {} bytes for {} ({}/{})",
                    chunk.data.len(),
                    name,
                    transfer.cursor(),
                    transfer.total_size()
                );
                (chunk, false)
            }
            Err(err) => {
                tracing::error!("Upload chunk request for {} failed: {}", name, err);
                transfer.mark_failed(err);
                (ProducedChunk::done(), true)
            }
        });

        chunk.unwrap_or_else(|| {
            tracing::trace!("Ignoring chunk request for unregistered transfer {}", name);
            ProducedChunk::done()
        })
    }

    pub(crate) fn consume_chunk_for(
        &self,
        name: &str,
        id: Option<TransferId>,
        data: Option<&[u8]>,
        announced_total: u64,
        is_last: bool,
    ) -> ReadOutcome {
        let outcome = self.with_transfer(name, id, |transfer| {
            match transfer.consume(data, announced_total, is_last) {
                Ok(()) => {
                    tracing::trace!(
                        "Consumed {} bytes for {} ({}/{})",
                        data.map_or(0, <[u8]>::len),
                        name,
                        transfer.cursor(),
                        transfer.total_size()
                    );
                    (ReadOutcome::Continue, false)
                }
                Err(err) => {
                    tracing::error!("Download of {} failed: {}", name, err);
                    transfer.mark_failed(err);
                    (ReadOutcome::Fail, true)
                }
            }
        });

        match outcome {
            Some(outcome) => outcome,
            // A null payload is a hard failure even without a transfer to fail
            None if data.is_none() => ReadOutcome::Fail,
            None => {
                tracing::debug!("Dropping chunk for unregistered transfer {}", name);
                ReadOutcome::Cancel
            }
        }
    }

    pub(crate) fn report_progress_for(
        &self,
        name: &str,
        id: Option<TransferId>,
        bytes_transferred: u64,
        total_bytes: u64,
    ) {
        if total_bytes == 0 {
            return;
        }

        let callback = self
            .with_transfer(name, id, |transfer| (transfer.on_progress.clone(), false))
            .flatten();

        if let Some(callback) = callback {
            callback((bytes_transferred as f64 / total_bytes as f64) as f32);
        }
    }

    pub(crate) fn finish_for(
        &self,
        name: &str,
        id: Option<TransferId>,
        status: std::result::Result<(), BackendError>,
    ) -> bool {
        let settled = self.with_transfer(name, id, |transfer| {
            let full_progress = match transfer.confirm(status) {
                Ok(()) => {
                    transfer.mark_completed();
                    // Zero-byte transfers never see a progress report
                    if transfer.total_size() == 0 {
                        transfer.on_progress.clone()
                    } else {
                        None
                    }
                }
                Err(err) => {
                    tracing::warn!("Transfer {} finished unsuccessfully: {}", name, err);
                    transfer.mark_failed(err);
                    None
                }
            };
            ((full_progress, transfer.id), false)
        });

        let Some((full_progress, current)) = settled else {
            tracing::debug!("Ignoring completion for unregistered transfer {}", name);
            return false;
        };

        if let Some(callback) = full_progress {
            callback(1.0);
        }
        self.retire(name, current)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn resolve_chunk_size(&self, name: &str, options: &TransferOptions) -> Result<usize> {
        if name.is_empty() {
            return Err(EngineError::EmptyName);
        }

        let size = options
            .chunk_size
            .unwrap_or(self.config.default_chunk_size);
        if size == 0 || size > self.config.max_chunk_size {
            return Err(EngineError::InvalidChunkSize {
                size,
                max: self.config.max_chunk_size,
            });
        }
        Ok(size)
    }

    /// Register `transfer` (replacing any previous one) and hand it to the backend
    fn launch(self: &Arc<Self>, transfer: Transfer) -> TransferRequest {
        let request = request_for(&transfer);

        if let Some(previous) = self.transfers.insert(request.name.clone(), transfer) {
            tracing::warn!(
                "Replacing in-flight {} of {} ({} -> {})",
                previous.direction,
                request.name,
                previous.id,
                request.id
            );
            self.cancel_removed(previous);
        }

        let driver = TransferDriver::new(Arc::clone(self), request.clone());
        let begun = match request.direction {
            Direction::Upload => self.backend.begin_upload(&request, driver),
            Direction::Download => self.backend.begin_download(&request, driver),
        };

        if let Err(err) = begun {
            tracing::warn!(
                "Backend refused {} of {}: {}",
                request.direction,
                request.name,
                err
            );
            self.fail(&request.name, request.id, TransferError::Backend(err));
        }

        request
    }

    /// Run `f` against the registered transfer, retiring it afterwards if `f`
    /// asks to. Returns `None` for orphans (unknown name or stale id).
    fn with_transfer<R>(
        &self,
        name: &str,
        id: Option<TransferId>,
        f: impl FnOnce(&mut Transfer) -> (R, bool),
    ) -> Option<R> {
        let (value, retire, current) = {
            let mut entry = self.transfers.get_mut(name)?;
            if id.is_some_and(|id| id != entry.id) {
                return None;
            }
            let current = entry.id;
            let (value, retire) = f(entry.value_mut());
            (value, retire, current)
        };

        if retire {
            self.retire(name, current);
        }
        Some(value)
    }

    /// Fail the transfer if it is still the registered generation
    fn fail(&self, name: &str, id: TransferId, err: TransferError) {
        let _ = self.with_transfer(name, Some(id), |transfer| {
            transfer.mark_failed(err);
            ((), true)
        });
    }

    /// Remove the transfer if it is still generation `id`, then notify
    fn retire(&self, name: &str, id: TransferId) -> bool {
        match self.transfers.remove_if(name, |_, transfer| transfer.id == id) {
            Some((_, transfer)) => {
                notify(transfer);
                true
            }
            None => false,
        }
    }

    /// Notify a transfer already removed from the registry as cancelled
    fn cancel_removed(&self, mut transfer: Transfer) {
        tracing::info!(
            "Cancelling {} of {} {} ({}/{} bytes)",
            transfer.direction,
            transfer.name,
            transfer.id,
            transfer.cursor(),
            transfer.total_size()
        );
        transfer.mark_cancelled();
        self.backend.cancel(&request_for(&transfer));
        notify(transfer);
    }
}

impl std::fmt::Debug for ChunkedTransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedTransferEngine")
            .field("transfers", &self.transfers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn request_for(transfer: &Transfer) -> TransferRequest {
    TransferRequest {
        name: transfer.name.clone(),
        id: transfer.id,
        direction: transfer.direction,
        chunk_size: transfer.chunk_size,
        size: match transfer.direction {
            Direction::Upload => Some(transfer.total_size()),
            Direction::Download => None,
        },
    }
}

fn notify(transfer: Transfer) {
    let (callback, completion) = transfer.into_completion();

    match &completion.result {
        Ok(_) => tracing::debug!(
            "{} of {} {} completed",
            completion.direction,
            completion.name,
            completion.id
        ),
        Err(err) => tracing::debug!(
            "{} of {} {} ended: {}",
            completion.direction,
            completion.name,
            completion.id,
            err
        ),
    }

    if let Some(callback) = callback {
        callback(completion);
    }
}
