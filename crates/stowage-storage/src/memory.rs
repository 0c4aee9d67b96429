//! In-memory object store.
//!
//! Drives every transfer to completion inside `begin_upload`/`begin_download`
//! on the caller's thread, so completions fire before `start_*` returns.

use dashmap::DashMap;
use stowage_core::{
    BackendError, FileMetadata, ListCallback, ReadOutcome, StatusCallback, StorageBackend,
    TransferDriver, TransferRequest,
};

/// Object store holding blobs in a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a blob directly, bypassing the transfer engine
    pub fn insert(&self, name: impl Into<String>, data: Vec<u8>) {
        self.blobs.insert(name.into(), data);
    }

    /// Copy of a stored blob
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.get(name).map(|blob| blob.clone())
    }

    /// Check if a blob exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    /// Number of stored blobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl StorageBackend for MemoryStore {
    fn begin_upload(
        &self,
        request: &TransferRequest,
        driver: TransferDriver,
    ) -> Result<(), BackendError> {
        let total = request.size.unwrap_or(0);
        let mut staged = Vec::with_capacity(total as usize);

        loop {
            let chunk = driver.produce_chunk();
            staged.extend_from_slice(&chunk.data);
            driver.report_progress(staged.len() as u64, total);
            if chunk.is_done {
                break;
            }
        }

        // A cancelled transfer stops producing early; never publish a partial blob
        if staged.len() as u64 == total && driver.is_current() {
            tracing::debug!("Stored {} ({} bytes)", request.name, total);
            self.blobs.insert(request.name.clone(), staged);
        }
        driver.finish(Ok(()));
        Ok(())
    }

    fn begin_download(
        &self,
        request: &TransferRequest,
        driver: TransferDriver,
    ) -> Result<(), BackendError> {
        let Some(blob) = self.get(&request.name) else {
            driver.finish(Err(BackendError::NotFound(request.name.clone())));
            return Ok(());
        };

        let total = blob.len() as u64;
        if blob.is_empty() && driver.consume_chunk(Some(&[]), 0, true) != ReadOutcome::Continue {
            return Ok(());
        }

        let mut sent = 0;
        for chunk in blob.chunks(request.chunk_size) {
            sent += chunk.len();
            let outcome = driver.consume_chunk(Some(chunk), total, sent == blob.len());
            if outcome != ReadOutcome::Continue {
                tracing::debug!("Read of {} stopped: {:?}", request.name, outcome);
                return Ok(());
            }
            driver.report_progress(sent as u64, total);
        }

        driver.finish(Ok(()));
        Ok(())
    }

    fn cancel(&self, request: &TransferRequest) {
        tracing::trace!("Cancel requested for {} {}", request.name, request.id);
    }

    fn query_file_list(&self, done: ListCallback) {
        let mut files: Vec<FileMetadata> = self
            .blobs
            .iter()
            .map(|entry| FileMetadata {
                name: entry.key().clone(),
                size: entry.value().len() as u64,
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        done(Ok(files));
    }

    fn delete_file(&self, name: &str, done: StatusCallback) {
        let status = match self.blobs.remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(name.to_string())),
        };
        done(status);
    }

    fn duplicate_file(&self, source: &str, destination: &str, done: StatusCallback) {
        let status = match self.get(source) {
            Some(blob) => {
                self.blobs.insert(destination.to_string(), blob);
                Ok(())
            }
            None => Err(BackendError::NotFound(source.to_string())),
        };
        done(status);
    }
}
