//! Directory-backed object store.
//!
//! One file per blob under a root directory. Every request runs on a tokio
//! blocking worker, so chunk callbacks reach the engine from threads other
//! than the one that started the transfer.
//!
//! Uploads are written to a hidden `.{name}.{id}.part` file and renamed into
//! place once every byte has arrived. Cancellation sets a per-request flag
//! the worker checks between chunks.

use dashmap::DashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stowage_core::{
    BackendError, FileMetadata, ListCallback, ReadOutcome, StatusCallback, StorageBackend,
    TransferDriver, TransferId, TransferRequest,
};
use tokio::runtime::Handle;

/// Object store keeping one file per blob under `root`
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    runtime: Handle,
    /// Cancel flags of running transfers (id -> flag)
    cancels: Arc<DashMap<TransferId, Arc<AtomicBool>>>,
}

impl DirectoryStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Must be called from within a tokio runtime; workers are spawned on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or no runtime is
    /// running.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let runtime = Handle::try_current()
            .map_err(|_| BackendError::unavailable("directory store requires a tokio runtime"))?;

        tracing::debug!("Opened directory store at {}", root.display());

        Ok(Self {
            root,
            runtime,
            cancels: Arc::new(DashMap::new()),
        })
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, name: &str) -> Result<PathBuf, BackendError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn register(&self, id: TransferId) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancels.insert(id, Arc::clone(&flag));
        flag
    }
}

impl StorageBackend for DirectoryStore {
    fn begin_upload(
        &self,
        request: &TransferRequest,
        driver: TransferDriver,
    ) -> Result<(), BackendError> {
        let path = self.blob_path(&request.name)?;
        let part = self
            .root
            .join(format!(".{}.{}.part", request.name, request.id.as_u64()));
        let total = request.size.unwrap_or(0);
        let flag = self.register(request.id);
        let cancels = Arc::clone(&self.cancels);
        let id = request.id;

        self.runtime.spawn_blocking(move || {
            let status = write_blob(&path, &part, &driver, &flag, total);
            if status.is_err() {
                let _ = fs::remove_file(&part);
            }
            cancels.remove(&id);
            driver.finish(status);
        });

        Ok(())
    }

    fn begin_download(
        &self,
        request: &TransferRequest,
        driver: TransferDriver,
    ) -> Result<(), BackendError> {
        let path = self.blob_path(&request.name)?;
        let flag = self.register(request.id);
        let cancels = Arc::clone(&self.cancels);
        let id = request.id;
        let name = request.name.clone();
        let chunk_size = request.chunk_size;

        self.runtime.spawn_blocking(move || {
            let status = read_blob(&path, &name, chunk_size, &driver, &flag);
            cancels.remove(&id);
            match status {
                Ok(true) => {
                    driver.finish(Ok(()));
                }
                // The engine already settled the transfer
                Ok(false) => {}
                Err(err) => {
                    driver.finish(Err(err));
                }
            }
        });

        Ok(())
    }

    fn cancel(&self, request: &TransferRequest) {
        if let Some(flag) = self.cancels.get(&request.id) {
            tracing::debug!("Flagging {} {} for cancellation", request.name, request.id);
            flag.store(true, Ordering::Release);
        }
    }

    fn query_file_list(&self, done: ListCallback) {
        let root = self.root.clone();
        self.runtime.spawn_blocking(move || done(list_blobs(&root)));
    }

    fn delete_file(&self, name: &str, done: StatusCallback) {
        let path = match self.blob_path(name) {
            Ok(path) => path,
            Err(err) => return done(Err(err)),
        };
        let name = name.to_string();

        self.runtime.spawn_blocking(move || {
            let status = fs::remove_file(&path).map_err(|err| blob_error(&name, err));
            if status.is_ok() {
                tracing::debug!("Deleted {}", name);
            }
            done(status);
        });
    }

    fn duplicate_file(&self, source: &str, destination: &str, done: StatusCallback) {
        let (from, to) = match (self.blob_path(source), self.blob_path(destination)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(err), _) | (_, Err(err)) => return done(Err(err)),
        };
        let part = self.root.join(format!(".{destination}.copy.part"));
        let source = source.to_string();

        self.runtime.spawn_blocking(move || {
            let status = fs::copy(&from, &part)
                .map_err(|err| blob_error(&source, err))
                .and_then(|_| fs::rename(&part, &to).map_err(BackendError::from));
            if status.is_err() {
                let _ = fs::remove_file(&part);
            }
            done(status);
        });
    }
}

/// Reject names that would escape the root or collide with temporary files
fn validate_name(name: &str) -> Result<(), BackendError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');

    if invalid {
        return Err(BackendError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Map an I/O error on a named blob, keeping the blob name for `NotFound`
fn blob_error(name: &str, err: io::Error) -> BackendError {
    if err.kind() == io::ErrorKind::NotFound {
        BackendError::NotFound(name.to_string())
    } else {
        BackendError::from(err)
    }
}

fn write_blob(
    path: &Path,
    part: &Path,
    driver: &TransferDriver,
    cancelled: &AtomicBool,
    total: u64,
) -> Result<(), BackendError> {
    let mut file = File::create(part)?;
    let mut written = 0u64;

    loop {
        if cancelled.load(Ordering::Acquire) {
            return Err(BackendError::Cancelled);
        }

        let chunk = driver.produce_chunk();
        file.write_all(&chunk.data)?;
        written += chunk.data.len() as u64;
        driver.report_progress(written, total);

        if chunk.is_done {
            break;
        }
    }

    file.sync_all()?;
    drop(file);

    // Orphaned uploads stop early with an empty terminal chunk
    if written != total || cancelled.load(Ordering::Acquire) {
        return Err(BackendError::Cancelled);
    }

    fs::rename(part, path)?;
    tracing::debug!("Stored {} ({} bytes)", path.display(), total);
    Ok(())
}

/// Push `path` through the driver. `Ok(false)` means the engine stopped the
/// read and has already settled the transfer.
fn read_blob(
    path: &Path,
    name: &str,
    chunk_size: usize,
    driver: &TransferDriver,
    cancelled: &AtomicBool,
) -> Result<bool, BackendError> {
    let mut file = File::open(path).map_err(|err| blob_error(name, err))?;
    let total = file.metadata()?.len();
    let mut buf = vec![0u8; chunk_size];
    let mut sent = 0u64;

    loop {
        if cancelled.load(Ordering::Acquire) {
            return Err(BackendError::Cancelled);
        }

        let n = fill(&mut file, &mut buf)?;
        sent += n as u64;
        let is_last = n < buf.len() || sent >= total;

        match driver.consume_chunk(Some(&buf[..n]), total, is_last) {
            ReadOutcome::Continue => {}
            ReadOutcome::Fail | ReadOutcome::Cancel => return Ok(false),
        }
        driver.report_progress(sent, total);

        if is_last {
            return Ok(true);
        }
    }
}

/// Read until `buf` is full or the file ends
fn fill(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn list_blobs(root: &Path) -> Result<Vec<FileMetadata>, BackendError> {
    let mut files = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if validate_name(&name).is_err() {
            continue;
        }
        files.push(FileMetadata {
            name,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
