use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::client::{BlobClient, ObjectInfo};
use crate::error::{StorageError, StorageResult};

/// Blob store backed by a directory, e.g. a folder mounted from a file
/// sync service. Object keys map to relative paths.
#[derive(Clone, Debug)]
pub struct DirectoryBlobClient {
    root: PathBuf,
}

impl DirectoryBlobClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::PermissionDenied(format!("invalid object key {key:?}")));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobClient for DirectoryBlobClient {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| StorageError::from_io(e, key))?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn append(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::from_io(e, key))?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| StorageError::from_io(e, key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, key)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let mut out = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if rel.is_empty() { name } else { format!("{rel}/{name}") };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    // Only descend into directories that can still match.
                    let dir_key = format!("{key}/");
                    if prefix.starts_with(&dir_key) || dir_key.starts_with(prefix) {
                        pending.push((entry.path(), key));
                    }
                } else if file_type.is_file() && key.starts_with(prefix) {
                    let size = entry.metadata().await?.len();
                    out.push(ObjectInfo { key, size });
                }
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn ping(&self) -> StorageResult<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(StorageError::Offline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn objects_live_under_key_paths() {
        let dir = tempfile::tempdir().unwrap();
        let client = DirectoryBlobClient::new(dir.path());
        client.put("user/slot/dev-1", b"abc").await.unwrap();
        client.append("user/slot/dev-1", b"def").await.unwrap();
        assert!(dir.path().join("user/slot/dev-1").is_file());
        assert_eq!(client.get("user/slot/dev-1").await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let client = DirectoryBlobClient::new(dir.path());
        for key in ["u/a/d-1", "u/a/d-2", "u/ab/d-1", "w/a/d-1"] {
            client.put(key, b"x").await.unwrap();
        }
        let keys: Vec<String> = client.list("u/a/").await.unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["u/a/d-1", "u/a/d-2"]);
        assert_eq!(client.list("u/").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let client = DirectoryBlobClient::new(dir.path());
        client.delete("u/a/d-1").await.unwrap();
        assert!(matches!(client.get("u/a/d-1").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let client = DirectoryBlobClient::new(dir.path());
        assert!(client.put("../escape", b"x").await.is_err());
    }

    #[tokio::test]
    async fn missing_root_is_offline() {
        let client = DirectoryBlobClient::new("/nonexistent/slotkeep/cloud");
        assert!(matches!(client.ping().await, Err(StorageError::Offline)));
    }
}
