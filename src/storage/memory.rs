use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{AppError, Result};
use crate::storage::StorageProvider;

/// Process-local blob store.
///
/// Failure switches let callers simulate an unavailable backend.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: DashMap<String, Bytes>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of successful puts so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Storage("memory store rejected write".to_string()));
        }
        self.blobs.insert(key.to_string(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Storage("memory store rejected read".to_string()));
        }
        self.blobs
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("Blob not found: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Storage("memory store rejected delete".to_string()));
        }
        self.blobs.remove(key);
        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "memory"
    }
}
