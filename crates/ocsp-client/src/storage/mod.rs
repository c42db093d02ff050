//! Key/value storage for cache persistence
//!
//! The response cache is persisted as a single JSON document under
//! [`CACHE_STORAGE_KEY`](crate::cache::CACHE_STORAGE_KEY). Any backend that
//! can store opaque bytes by key implements [`Storage`]; [`MemoryStorage`]
//! is the in-process implementation used for tests and single-node setups.

pub mod error;
pub mod memory;

pub use error::StorageError;
pub use memory::MemoryStorage;

use async_trait::async_trait;

/// Storage backend trait for pluggable persistence
///
/// Implementations must be thread-safe. Keys are plain strings; values are
/// opaque bytes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Get a value by key
    ///
    /// Returns `None` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a value, replacing any previous one
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key
    ///
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
