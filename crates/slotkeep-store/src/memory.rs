use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{BlobClient, ObjectInfo};
use crate::error::{StorageError, StorageResult};

/// In-memory blob store.
///
/// Intended for tests and embedding. Every request first sleeps for the
/// configured latency (which honours tokio's paused clock), then fails with
/// [`StorageError::Offline`] if the client has been switched offline.
pub struct InMemoryBlobClient {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    latency: RwLock<Duration>,
    online: AtomicBool,
    quota: Option<u64>,
}

impl InMemoryBlobClient {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            latency: RwLock::new(Duration::ZERO),
            online: AtomicBool::new(true),
            quota: None,
        }
    }

    /// Limit total stored bytes.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().expect("lock poisoned") = latency;
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().expect("lock poisoned").keys().cloned().collect()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|v| v.len() as u64)
            .sum()
    }

    /// Overwrite an object directly, bypassing latency and quota.
    pub fn insert_raw(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.write().expect("lock poisoned").insert(key.into(), data);
    }

    async fn round_trip(&self) -> StorageResult<()> {
        let latency = *self.latency.read().expect("lock poisoned");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Offline)
        }
    }

    fn check_quota(&self, objects: &BTreeMap<String, Vec<u8>>, growth: u64) -> StorageResult<()> {
        let Some(quota) = self.quota else {
            return Ok(());
        };
        let used: u64 = objects.values().map(|v| v.len() as u64).sum();
        if used + growth > quota {
            return Err(StorageError::QuotaExceeded {
                needed: growth,
                available: quota.saturating_sub(used),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryBlobClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobClient for InMemoryBlobClient {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.round_trip().await?;
        let mut objects = self.objects.write().expect("lock poisoned");
        let replaced = objects.get(key).map(|v| v.len() as u64).unwrap_or(0);
        self.check_quota(&objects, (data.len() as u64).saturating_sub(replaced))?;
        objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn append(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.round_trip().await?;
        let mut objects = self.objects.write().expect("lock poisoned");
        if !objects.contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.check_quota(&objects, data.len() as u64)?;
        if let Some(existing) = objects.get_mut(key) {
            existing.extend_from_slice(data);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.round_trip().await?;
        self.objects
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.round_trip().await?;
        self.objects.write().expect("lock poisoned").remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.round_trip().await?;
        let objects = self.objects.read().expect("lock poisoned");
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectInfo {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.round_trip().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_append_get() {
        let client = InMemoryBlobClient::new();
        client.put("u/s/d-1", b"ab").await.unwrap();
        client.append("u/s/d-1", b"cd").await.unwrap();
        assert_eq!(client.get("u/s/d-1").await.unwrap(), b"abcd");
        assert!(matches!(client.append("u/s/d-2", b"x").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let client = InMemoryBlobClient::new();
        for key in ["u/a/d-1", "u/a/d-2", "u/b/d-1", "v/a/d-1"] {
            client.put(key, b"x").await.unwrap();
        }
        let keys: Vec<String> = client.list("u/a/").await.unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["u/a/d-1", "u/a/d-2"]);
        assert_eq!(client.list("u/").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn offline_fails_every_call() {
        let client = InMemoryBlobClient::new();
        client.set_online(false);
        assert!(matches!(client.ping().await, Err(StorageError::Offline)));
        assert!(matches!(client.put("k", b"x").await, Err(StorageError::Offline)));
        client.set_online(true);
        assert!(client.ping().await.is_ok());
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let client = InMemoryBlobClient::new().with_quota(4);
        client.put("a", b"abc").await.unwrap();
        let err = client.append("a", b"de").await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { needed: 2, available: 1 }));
        // Replacing an object only counts the growth.
        client.put("a", b"wxyz").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn latency_uses_tokio_clock() {
        let client = InMemoryBlobClient::new().with_latency(Duration::from_secs(10));
        let start = tokio::time::Instant::now();
        client.ping().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
