//! Local cache of downloaded blob content.
//!
//! Every successful download is stored here under its blob name, last write
//! wins. Entries carry a BLAKE3 digest so callers can compare content
//! without holding on to both copies.

use dashmap::DashMap;
use std::sync::Arc;

/// Cached content of one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    data: Arc<[u8]>,
    digest: [u8; 32],
}

impl CachedFile {
    /// Hash and wrap `data`
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let digest = *blake3::hash(&data).as_bytes();
        Self {
            data: data.into(),
            digest,
        }
    }

    /// Cached bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the blob is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// BLAKE3 digest of the content
    #[must_use]
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// BLAKE3 digest as lowercase hex
    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Name-keyed cache of downloaded content
#[derive(Debug, Default)]
pub struct FileCache {
    entries: DashMap<String, CachedFile>,
}

impl FileCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `name`, replacing any previous entry
    pub fn insert(&self, name: impl Into<String>, data: Vec<u8>) -> CachedFile {
        let file = CachedFile::new(data);
        self.entries.insert(name.into(), file.clone());
        file
    }

    /// Cached content of `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<CachedFile> {
        self.entries.get(name).map(|entry| entry.clone())
    }

    /// Check if `name` is cached
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Drop the entry for `name`
    pub fn remove(&self, name: &str) -> Option<CachedFile> {
        self.entries.remove(name).map(|(_, file)| file)
    }

    /// Cached names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of cached blobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = FileCache::new();
        let file = cache.insert("save1", b"hello".to_vec());

        assert_eq!(file.len(), 5);
        assert_eq!(cache.get("save1").unwrap().data(), b"hello");
        assert_eq!(file.digest(), blake3::hash(b"hello").as_bytes());
        assert_eq!(file.digest_hex().len(), 64);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = FileCache::new();
        cache.insert("save1", b"first".to_vec());
        cache.insert("save1", b"second".to_vec());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("save1").unwrap().data(), b"second");
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = FileCache::new();
        cache.insert("b", Vec::new());
        cache.insert("a", vec![1]);
        assert_eq!(cache.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(cache.get("b").unwrap().is_empty());

        assert!(cache.remove("a").is_some());
        assert!(cache.remove("a").is_none());
        assert!(!cache.contains("a"));

        cache.clear();
        assert!(cache.is_empty());
    }
}
