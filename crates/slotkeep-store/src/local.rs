use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slotkeep_container::format::peek_header;
use slotkeep_types::{Checksum, DeviceId, Location, SaveDataInfo, SlotMetadata, SlotName, Timestamp};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::traits::{StorageBackend, TransferObserver};

/// Extension of container files.
pub const DATA_EXT: &str = "sav";

/// Suffix of the JSON metadata sidecar.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Default write chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Metadata persisted next to each container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Sidecar {
    schema_version: u32,
    timestamp: Timestamp,
    #[serde(default)]
    description: String,
    checksum: String,
    origin: DeviceId,
}

impl Sidecar {
    fn from_meta(meta: &SlotMetadata) -> Self {
        Self {
            schema_version: meta.schema_version,
            timestamp: meta.timestamp,
            description: meta.description.clone(),
            checksum: meta.checksum.to_hex(),
            origin: meta.origin.clone(),
        }
    }
}

/// Filesystem-directory backend.
///
/// Layout of the root directory:
///
/// ```text
/// <slot>.sav              container bytes
/// <slot>.meta.json        sidecar metadata
/// .<slot>.<uuid>.tmp      in-flight write (never read)
/// ```
#[derive(Clone, Debug)]
pub struct LocalBackend {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::from_io(e, root.display().to_string()))?;
        Ok(Self {
            root,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self, slot: &SlotName) -> PathBuf {
        self.root.join(format!("{slot}.{DATA_EXT}"))
    }

    fn sidecar_path(&self, slot: &SlotName) -> PathBuf {
        self.root.join(format!("{slot}{SIDECAR_SUFFIX}"))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!(".{name}.{}.tmp", uuid::Uuid::now_v7().simple()))
    }

    /// Remove temporary files left behind by a crash. Returns how many were
    /// removed.
    pub async fn sweep_temp_files(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.ends_with(".tmp") {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, root = %self.root.display(), "swept temporary files");
        }
        Ok(removed)
    }

    async fn write_chunks(
        &self,
        tmp: &Path,
        bytes: &[u8],
        observer: &dyn TransferObserver,
    ) -> StorageResult<()> {
        let mut file = fs::File::create(tmp).await?;
        let total = bytes.len() as u64;
        let mut done = 0u64;
        for chunk in bytes.chunks(self.chunk_size) {
            if observer.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            file.write_all(chunk).await?;
            done += chunk.len() as u64;
            observer.on_progress(done, total);
        }
        if observer.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        file.sync_all().await?;
        Ok(())
    }

    async fn write_sidecar(&self, slot: &SlotName, meta: &SlotMetadata) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(&Sidecar::from_meta(meta))?;
        let tmp = self.temp_path(&format!("{slot}.meta"));
        let written = match fs::write(&tmp, &json).await {
            Ok(()) => fs::rename(&tmp, self.sidecar_path(slot)).await,
            Err(e) => Err(e),
        };
        if written.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        Ok(written?)
    }

    async fn read_sidecar(&self, slot: &SlotName) -> Option<Sidecar> {
        let raw = fs::read(self.sidecar_path(slot)).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!(%slot, error = %e, "ignoring unreadable sidecar");
                None
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn location(&self) -> Location {
        Location::Local
    }

    async fn write(
        &self,
        slot: &SlotName,
        bytes: &[u8],
        meta: &SlotMetadata,
        observer: &dyn TransferObserver,
    ) -> StorageResult<SaveDataInfo> {
        let tmp = self.temp_path(slot.as_str());
        if let Err(e) = self.write_chunks(&tmp, bytes, observer).await {
            // The previous container is untouched; only the temp file goes.
            let _ = fs::remove_file(&tmp).await;
            debug!(%slot, error = %e, "local write abandoned");
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, self.data_path(slot)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::from_io(e, slot.as_str()));
        }
        // The container is live from here on; a missing sidecar only costs
        // the description and origin.
        if let Err(e) = self.write_sidecar(slot, meta).await {
            warn!(%slot, error = %e, "sidecar not written");
        }
        debug!(%slot, bytes = bytes.len(), "local write committed");

        Ok(SaveDataInfo::new(slot.clone(), bytes.len() as u64, meta.timestamp, Location::Local)
            .with_checksum(meta.checksum)
            .with_origin(meta.origin.clone())
            .with_schema_version(meta.schema_version)
            .with_description(meta.description.clone()))
    }

    async fn read(&self, slot: &SlotName) -> StorageResult<Vec<u8>> {
        fs::read(self.data_path(slot))
            .await
            .map_err(|e| StorageError::from_io(e, slot.as_str()))
    }

    async fn delete(&self, slot: &SlotName) -> StorageResult<()> {
        fs::remove_file(self.data_path(slot))
            .await
            .map_err(|e| StorageError::from_io(e, slot.as_str()))?;
        match fs::remove_file(self.sidecar_path(slot)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::from_io(e, slot.as_str())),
        }
        debug!(%slot, "local slot deleted");
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<SaveDataInfo>> {
        let mut slots = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(&format!(".{DATA_EXT}")) else {
                continue;
            };
            match SlotName::new(stem) {
                Ok(slot) => slots.push(slot),
                Err(e) => debug!(file = %name, error = %e, "skipping foreign file"),
            }
        }
        slots.sort();

        let mut infos = Vec::with_capacity(slots.len());
        for slot in slots {
            match self.info(&slot).await {
                Ok(info) => infos.push(info),
                // Deleted between read_dir and stat.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(infos)
    }

    async fn info(&self, slot: &SlotName) -> StorageResult<SaveDataInfo> {
        let path = self.data_path(slot);
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(e, slot.as_str()))?;
        let size = meta.len();

        // Checksum and version always come from the container itself.
        let mut raw = vec![0u8; slotkeep_container::HEADER_LEN];
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(e, slot.as_str()))?;
        let header = match file.read_exact(&mut raw).await {
            Ok(_) => peek_header(&raw).ok(),
            Err(_) => None,
        };
        if header.is_none() {
            warn!(%slot, "container header unreadable");
        }
        let checksum = header.as_ref().map(|h| h.checksum);

        // A sidecar describing other bytes is stale (write interrupted
        // between the two renames) and is ignored.
        let sidecar = self
            .read_sidecar(slot)
            .await
            .filter(|sidecar| match Checksum::from_hex(&sidecar.checksum) {
                Ok(recorded) if Some(recorded) == checksum => true,
                _ => {
                    warn!(%slot, "ignoring sidecar that does not match the container");
                    false
                }
            });

        let mut info = match sidecar {
            Some(sidecar) => SaveDataInfo::new(slot.clone(), size, sidecar.timestamp, Location::Local)
                .with_origin(sidecar.origin)
                .with_description(sidecar.description),
            None => {
                let modified = meta
                    .modified()
                    .map(Timestamp::from_system_time)
                    .unwrap_or_default();
                SaveDataInfo::new(slot.clone(), size, modified, Location::Local)
            }
        };
        info.checksum = checksum;
        info.schema_version = header.map(|h| h.schema_version);
        Ok(info)
    }

    async fn availability(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use slotkeep_codec::Snapshot;
    use slotkeep_container::{MigrationChain, SaveSchema};

    use super::*;
    use crate::traits::NoopObserver;

    fn slot(name: &str) -> SlotName {
        SlotName::new(name).unwrap()
    }

    fn container(hp: i64) -> (Vec<u8>, SlotMetadata) {
        let schema = SaveSchema::new(MigrationChain::new(1));
        let blob = schema.seal(&Snapshot::new().with("hp", hp)).unwrap();
        let meta = SlotMetadata {
            schema_version: 1,
            timestamp: Timestamp::from_millis(1_000 + hp as u64),
            description: format!("hp {hp}"),
            locations: Location::Local,
            checksum: blob.checksum(),
            origin: DeviceId::new("dev-a").unwrap(),
        };
        (blob.to_bytes(), meta)
    }

    /// Cancels after `after` chunks.
    struct CancelAfter {
        after: usize,
        seen: AtomicUsize,
    }

    impl TransferObserver for CancelAfter {
        fn is_cancelled(&self) -> bool {
            self.seen.load(Ordering::SeqCst) >= self.after
        }

        fn on_progress(&self, _done: u64, _total: u64) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        let (bytes, meta) = container(10);
        let info = backend.write(&slot("Profile1"), &bytes, &meta, &NoopObserver).await.unwrap();
        assert_eq!(info.size, bytes.len() as u64);
        assert_eq!(info.checksum, Some(meta.checksum));
        assert_eq!(backend.read(&slot("Profile1")).await.unwrap(), bytes);
        assert!(dir.path().join("Profile1.sav").is_file());
        assert!(dir.path().join("Profile1.meta.json").is_file());
    }

    #[tokio::test]
    async fn info_comes_from_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        let (bytes, meta) = container(10);
        backend.write(&slot("Profile1"), &bytes, &meta, &NoopObserver).await.unwrap();
        let info = backend.info(&slot("Profile1")).await.unwrap();
        assert_eq!(info.modified, meta.timestamp);
        assert_eq!(info.origin, Some(meta.origin));
        assert_eq!(info.description, "hp 10");
        assert_eq!(info.schema_version, Some(1));
    }

    #[tokio::test]
    async fn info_without_sidecar_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        let (bytes, meta) = container(10);
        backend.write(&slot("Profile1"), &bytes, &meta, &NoopObserver).await.unwrap();
        std::fs::remove_file(dir.path().join("Profile1.meta.json")).unwrap();
        let info = backend.info(&slot("Profile1")).await.unwrap();
        assert_eq!(info.checksum, Some(meta.checksum));
        assert_eq!(info.schema_version, Some(1));
        assert!(info.origin.is_none());
    }

    #[tokio::test]
    async fn stale_sidecar_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        let (v1, v1_meta) = container(1);
        backend.write(&slot("Profile1"), &v1, &v1_meta, &NoopObserver).await.unwrap();
        let sidecar = dir.path().join("Profile1.meta.json");
        let v1_sidecar = std::fs::read(&sidecar).unwrap();

        let (v2, v2_meta) = container(2);
        backend.write(&slot("Profile1"), &v2, &v2_meta, &NoopObserver).await.unwrap();
        // Crash after the container rename, before the sidecar rename.
        std::fs::write(&sidecar, v1_sidecar).unwrap();

        let info = backend.info(&slot("Profile1")).await.unwrap();
        assert_ne!(v1_meta.checksum, v2_meta.checksum);
        assert_eq!(info.checksum, Some(v2_meta.checksum));
        assert_eq!(info.schema_version, Some(1));
        assert_ne!(info.modified, v1_meta.timestamp);
        assert!(info.origin.is_none());
        assert_eq!(info.description, "");
    }

    #[tokio::test]
    async fn sidecar_failure_does_not_fail_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        // A directory in the sidecar's place makes its rename fail.
        std::fs::create_dir(dir.path().join("Profile1.meta.json")).unwrap();

        let (bytes, meta) = container(4);
        let info = backend.write(&slot("Profile1"), &bytes, &meta, &NoopObserver).await.unwrap();
        assert_eq!(info.checksum, Some(meta.checksum));
        assert_eq!(backend.read(&slot("Profile1")).await.unwrap(), bytes);
        assert_eq!(backend.info(&slot("Profile1")).await.unwrap().checksum, Some(meta.checksum));
        assert_eq!(backend.sweep_temp_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_write_keeps_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap().with_chunk_size(8);
        let (old, old_meta) = container(1);
        backend.write(&slot("Slot_A"), &old, &old_meta, &NoopObserver).await.unwrap();

        let (new, new_meta) = container(2);
        let observer = CancelAfter {
            after: 2,
            seen: AtomicUsize::new(0),
        };
        let err = backend.write(&slot("Slot_A"), &new, &new_meta, &observer).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert_eq!(backend.read(&slot("Slot_A")).await.unwrap(), old);

        // No temporary file survives.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn list_skips_temp_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        let (bytes, meta) = container(3);
        backend.write(&slot("b"), &bytes, &meta, &NoopObserver).await.unwrap();
        backend.write(&slot("a"), &bytes, &meta, &NoopObserver).await.unwrap();
        std::fs::write(dir.path().join(".a.123.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();

        let names: Vec<String> = backend
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.slot.to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(backend.sweep_temp_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        let (bytes, meta) = container(3);
        backend.write(&slot("gone"), &bytes, &meta, &NoopObserver).await.unwrap();
        backend.delete(&slot("gone")).await.unwrap();
        assert!(matches!(backend.read(&slot("gone")).await, Err(StorageError::NotFound(_))));
        assert!(matches!(backend.delete(&slot("gone")).await, Err(StorageError::NotFound(_))));
        assert!(!dir.path().join("gone.meta.json").exists());
    }

    #[tokio::test]
    async fn archive_copies_under_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).await.unwrap();
        let (bytes, meta) = container(5);
        backend.write(&slot("Profile1"), &bytes, &meta, &NoopObserver).await.unwrap();
        let archive = slot("Profile1").archive_name("dev-a", meta.timestamp).unwrap();
        let info = backend.archive(&slot("Profile1"), &archive).await.unwrap();
        assert_eq!(info.checksum, Some(meta.checksum));
        assert_eq!(backend.read(&archive).await.unwrap(), bytes);
        assert_eq!(backend.read(&slot("Profile1")).await.unwrap(), bytes);
    }
}
