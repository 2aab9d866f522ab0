pub mod local;
pub mod memory;
pub mod provider;

pub use local::*;
pub use memory::*;
pub use provider::*;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Build the blob store selected by configuration
pub fn build_provider(config: &StorageConfig) -> Arc<dyn StorageProvider> {
    match config.backend {
        StorageBackend::Local => Arc::new(LocalStorage::new(&config.local_path)),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    }
}
