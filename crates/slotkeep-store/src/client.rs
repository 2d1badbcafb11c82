use async_trait::async_trait;

use crate::error::StorageResult;

/// One object in a remote blob store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Minimal remote blob store interface used by [`crate::CloudBackend`].
///
/// Objects are built by one `put` followed by any number of `append`s. An
/// upload that stops part-way leaves a truncated object behind; the cloud
/// backend detects those by their missing trailer.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Create or replace `key` with `data`.
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Append `data` to an existing object.
    async fn append(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Every object whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Check connectivity.
    async fn ping(&self) -> StorageResult<()>;
}
