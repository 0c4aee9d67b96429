//! # Stowage Storage
//!
//! Storage service and object stores built on the Stowage transfer engine.
//!
//! This crate provides:
//! - [`StorageService`]: awaitable uploads, downloads, listing, delete and
//!   duplicate over any [`StorageBackend`](stowage_core::StorageBackend)
//! - [`FileCache`]: last-write-wins cache of downloaded content with BLAKE3 digests
//! - [`MemoryStore`]: in-process store, drives transfers synchronously
//! - [`DirectoryStore`]: one file per blob, drives transfers from blocking workers
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stowage_storage::{MemoryStore, ServiceConfig, StorageService};
//!
//! # async fn run() -> stowage_storage::Result<()> {
//! let service = StorageService::new(Arc::new(MemoryStore::new()), ServiceConfig::default())?;
//! service.upload("save1", b"hello".to_vec()).await?;
//! let data = service.download("save1").await?;
//! assert_eq!(data, b"hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod directory;
pub mod error;
pub mod memory;
pub mod service;

pub use cache::{CachedFile, FileCache};
pub use directory::DirectoryStore;
pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use service::{ServiceConfig, StorageService};
