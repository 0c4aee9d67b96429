//! Async storage service.
//!
//! Wraps a [`ChunkedTransferEngine`] so callers can `await` uploads and
//! downloads instead of wiring completion callbacks by hand. Downloaded
//! content lands in a [`FileCache`].

use crate::cache::FileCache;
use crate::error::{Result, StorageError};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{
    BackendError, ChunkedTransferEngine, Completion, EngineConfig, FileMetadata, StatusCallback,
    StorageBackend, TransferError, TransferOptions, TransferProgress, TransferRequest,
};
use tokio::sync::oneshot;

/// Service configuration
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Engine limits
    pub engine: EngineConfig,

    /// Cancel transfers that take longer than this
    pub transfer_timeout: Option<Duration>,
}

/// Awaitable facade over the transfer engine and its backend
pub struct StorageService {
    engine: Arc<ChunkedTransferEngine>,
    cache: FileCache,
    transfer_timeout: Option<Duration>,
}

impl StorageService {
    /// Create a service on top of `backend`
    ///
    /// # Errors
    ///
    /// Returns an error if the engine configuration is invalid.
    pub fn new(backend: Arc<dyn StorageBackend>, config: ServiceConfig) -> Result<Self> {
        config.engine.validate()?;

        Ok(Self {
            engine: ChunkedTransferEngine::new(backend, config.engine),
            cache: FileCache::new(),
            transfer_timeout: config.transfer_timeout,
        })
    }

    /// Underlying engine
    #[must_use]
    pub fn engine(&self) -> &Arc<ChunkedTransferEngine> {
        &self.engine
    }

    /// Cache of downloaded content
    #[must_use]
    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Upload `data` as `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer cannot start, fails, is cancelled or
    /// times out.
    pub async fn upload(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.run_upload(name, data, TransferOptions::new()).await
    }

    /// Upload `data` as `name`, reporting progress fractions
    ///
    /// # Errors
    ///
    /// See [`upload`](Self::upload).
    pub async fn upload_with_progress<F>(&self, name: &str, data: Vec<u8>, on_progress: F) -> Result<()>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.run_upload(name, data, TransferOptions::new().on_progress(on_progress))
            .await
    }

    /// Download `name`, caching the content on success
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer cannot start, fails, is cancelled or
    /// times out.
    pub async fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.run_download(name, TransferOptions::new()).await
    }

    /// Download `name`, reporting progress fractions
    ///
    /// # Errors
    ///
    /// See [`download`](Self::download).
    pub async fn download_with_progress<F>(&self, name: &str, on_progress: F) -> Result<Vec<u8>>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.run_download(name, TransferOptions::new().on_progress(on_progress))
            .await
    }

    /// List remote blobs. A store that reports `NotFound` has no blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub async fn query_file_list(&self) -> Result<Vec<FileMetadata>> {
        let (tx, rx) = oneshot::channel();
        self.engine.backend().query_file_list(Box::new(move |result| {
            let _ = tx.send(result);
        }));

        match rx.await.map_err(|_| StorageError::ChannelClosed)? {
            Ok(files) => {
                tracing::debug!("Listed {} remote files", files.len());
                Ok(files)
            }
            Err(BackendError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a remote blob and its cached content
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses or the blob does not exist.
    pub async fn delete_file(&self, name: &str) -> Result<()> {
        let backend = Arc::clone(self.engine.backend());
        await_status(|done| backend.delete_file(name, done)).await?;

        self.cache.remove(name);
        tracing::info!("Deleted {}", name);
        Ok(())
    }

    /// Copy a remote blob under a new name
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses or the source does not exist.
    pub async fn duplicate_file(&self, source: &str, destination: &str) -> Result<()> {
        let backend = Arc::clone(self.engine.backend());
        await_status(|done| backend.duplicate_file(source, destination, done)).await?;

        tracing::info!("Duplicated {} -> {}", source, destination);
        Ok(())
    }

    /// Cancel the transfer running under `name`
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if nothing runs under `name`.
    pub fn cancel(&self, name: &str) -> Result<()> {
        if self.engine.cancel_transfer(name) {
            Ok(())
        } else {
            Err(TransferError::NotFound(name.to_string()).into())
        }
    }

    /// Progress of the transfer running under `name`
    #[must_use]
    pub fn progress(&self, name: &str) -> Option<TransferProgress> {
        self.engine.progress(name)
    }

    /// Cancel every running transfer and drop the cache
    pub fn shutdown(&self) -> usize {
        let cancelled = self.engine.cancel_all();
        self.cache.clear();
        if cancelled > 0 {
            tracing::info!("Cancelled {} transfers on shutdown", cancelled);
        }
        cancelled
    }

    async fn run_upload(&self, name: &str, data: Vec<u8>, options: TransferOptions) -> Result<()> {
        let size = data.len();
        let (tx, rx) = oneshot::channel();
        let request = self.engine.start_upload(name, data, options, move |completion| {
            let _ = tx.send(completion);
        })?;

        self.wait(&request, rx).await?.into_result()?;
        tracing::info!("Uploaded {} ({} bytes)", name, size);
        Ok(())
    }

    async fn run_download(&self, name: &str, options: TransferOptions) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let request = self.engine.start_download(name, options, move |completion| {
            let _ = tx.send(completion);
        })?;

        let data = self
            .wait(&request, rx)
            .await?
            .into_result()?
            .unwrap_or_default();

        let cached = self.cache.insert(name, data.clone());
        tracing::info!(
            "Downloaded {} ({} bytes, blake3 {})",
            name,
            cached.len(),
            cached.digest_hex()
        );
        Ok(data)
    }

    async fn wait(
        &self,
        request: &TransferRequest,
        rx: oneshot::Receiver<Completion>,
    ) -> Result<Completion> {
        let received = match self.transfer_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(
                        "{} of {} timed out after {:?}",
                        request.direction,
                        request.name,
                        deadline
                    );
                    self.engine.cancel_request(request);
                    return Err(StorageError::Timeout(request.name.clone()));
                }
            },
            None => rx.await,
        };

        received.map_err(|_| StorageError::ChannelClosed)
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("engine", &self.engine)
            .field("cached", &self.cache.len())
            .field("transfer_timeout", &self.transfer_timeout)
            .finish()
    }
}

async fn await_status(send: impl FnOnce(StatusCallback)) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    send(Box::new(move |status| {
        let _ = tx.send(status);
    }));
    rx.await.map_err(|_| StorageError::ChannelClosed)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use stowage_core::{ListCallback, TransferDriver};

    fn memory_service() -> (Arc<MemoryStore>, StorageService) {
        let store = Arc::new(MemoryStore::new());
        let service = StorageService::new(store.clone(), ServiceConfig::default()).unwrap();
        (store, service)
    }

    /// Backend that accepts every request and never answers
    struct SilentBackend;

    impl StorageBackend for SilentBackend {
        fn begin_upload(
            &self,
            _request: &TransferRequest,
            _driver: TransferDriver,
        ) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        fn begin_download(
            &self,
            _request: &TransferRequest,
            _driver: TransferDriver,
        ) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        fn cancel(&self, _request: &TransferRequest) {}

        fn query_file_list(&self, done: ListCallback) {
            done(Err(BackendError::NotFound("root".into())));
        }

        fn delete_file(&self, _name: &str, done: StatusCallback) {
            done(Err(BackendError::rejected("read-only")));
        }

        fn duplicate_file(&self, _source: &str, _destination: &str, done: StatusCallback) {
            done(Err(BackendError::rejected("read-only")));
        }
    }

    #[tokio::test]
    async fn test_round_trip_caches_download() {
        let (store, service) = memory_service();

        service.upload("save1", b"payload".to_vec()).await.unwrap();
        assert_eq!(store.get("save1").unwrap(), b"payload".to_vec());
        assert!(!service.cache().contains("save1"));

        let data = service.download("save1").await.unwrap();
        assert_eq!(data, b"payload".to_vec());
        assert_eq!(service.cache().get("save1").unwrap().data(), b"payload");
    }

    #[tokio::test]
    async fn test_download_missing() {
        let (_store, service) = memory_service();
        let err = service.download("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_progress_reaches_one() {
        let (_store, service) = memory_service();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        service
            .upload_with_progress("save1", vec![0; 10_000], move |f| {
                sink.lock().unwrap().push(f);
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn test_list_delete_duplicate() {
        let (_store, service) = memory_service();
        service.upload("a", vec![1, 2, 3]).await.unwrap();
        service.download("a").await.unwrap();

        service.duplicate_file("a", "b").await.unwrap();
        let names: Vec<String> = service
            .query_file_list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        service.delete_file("a").await.unwrap();
        assert!(!service.cache().contains("a"));
        assert!(service.delete_file("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let (_store, service) = memory_service();
        assert!(matches!(
            service.upload("", vec![1]).await,
            Err(StorageError::Engine(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_cancels_transfer() {
        let service = StorageService::new(
            Arc::new(SilentBackend),
            ServiceConfig {
                transfer_timeout: Some(Duration::from_millis(20)),
                ..ServiceConfig::default()
            },
        )
        .unwrap();

        let err = service.download("save1").await.unwrap_err();
        assert!(matches!(err, StorageError::Timeout(ref name) if name == "save1"));
        assert_eq!(service.engine().transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_surfaces_error() {
        let service = Arc::new(
            StorageService::new(Arc::new(SilentBackend), ServiceConfig::default()).unwrap(),
        );

        let pending = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.upload("save1", vec![1; 8]).await })
        };
        while service.progress("save1").is_none() {
            tokio::task::yield_now().await;
        }
        service.cancel("save1").unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, StorageError::Transfer(TransferError::Cancelled)));

        let err = service.cancel("save1").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, StorageError::Transfer(TransferError::NotFound(ref name)) if name == "save1"));
    }

    #[tokio::test]
    async fn test_not_found_listing_is_empty() {
        let service =
            StorageService::new(Arc::new(SilentBackend), ServiceConfig::default()).unwrap();
        assert!(service.query_file_list().await.unwrap().is_empty());
        assert!(matches!(
            service.delete_file("x").await,
            Err(StorageError::Backend(BackendError::Rejected(_)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all() {
        let service = Arc::new(
            StorageService::new(Arc::new(SilentBackend), ServiceConfig::default()).unwrap(),
        );

        let mut pending = Vec::new();
        for name in ["a", "b"] {
            let service = Arc::clone(&service);
            pending.push(tokio::spawn(async move { service.download(name).await }));
        }
        while service.engine().transfer_count() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(service.shutdown(), 2);
        for task in pending {
            assert!(task.await.unwrap().unwrap_err().is_cancelled());
        }
    }
}
