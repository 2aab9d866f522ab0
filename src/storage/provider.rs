use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Opaque key to bytes store backing the content store
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Upload data to storage
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Download data from storage
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete data from storage. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
