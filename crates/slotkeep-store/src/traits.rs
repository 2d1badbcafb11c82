use async_trait::async_trait;
use slotkeep_container::format::peek_header;
use slotkeep_types::{DeviceId, Location, SaveDataInfo, SlotMetadata, SlotName};

use crate::error::{StorageError, StorageResult};

/// Progress and cancellation hook for long transfers.
///
/// Backends call [`Self::is_cancelled`] before every chunk and
/// [`Self::on_progress`] after it.
pub trait TransferObserver: Send + Sync {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn on_progress(&self, _done: u64, _total: u64) {}
}

/// Observer that never cancels and ignores progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// A place where save containers live.
///
/// All implementations must satisfy these invariants:
/// - Writes are atomic: a concurrent or later `read` sees either the previous
///   complete container or the new complete container, never a mix.
/// - A cancelled write leaves the previous copy readable.
/// - Containers are opaque; backends never decode payloads.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which side of a sync this backend represents.
    fn location(&self) -> Location;

    /// Store `bytes` as the new contents of `slot`.
    async fn write(
        &self,
        slot: &SlotName,
        bytes: &[u8],
        meta: &SlotMetadata,
        observer: &dyn TransferObserver,
    ) -> StorageResult<SaveDataInfo>;

    /// Read the current container of `slot`.
    ///
    /// Returns [`StorageError::NotFound`] if the slot does not exist.
    async fn read(&self, slot: &SlotName) -> StorageResult<Vec<u8>>;

    /// Remove `slot`. Returns [`StorageError::NotFound`] if it did not exist.
    async fn delete(&self, slot: &SlotName) -> StorageResult<()>;

    /// Listing entries for every slot, sorted by name.
    async fn list(&self) -> StorageResult<Vec<SaveDataInfo>>;

    /// Listing entry for one slot.
    async fn info(&self, slot: &SlotName) -> StorageResult<SaveDataInfo>;

    /// Returns `true` if the backend can currently serve requests.
    async fn availability(&self) -> bool;

    /// Copy the current container of `slot` to `archive`, leaving `slot`
    /// untouched.
    ///
    /// Default implementation reads, then writes through [`Self::write`].
    async fn archive(&self, slot: &SlotName, archive: &SlotName) -> StorageResult<SaveDataInfo> {
        let bytes = self.read(slot).await?;
        let info = self.info(slot).await?;
        let header = peek_header(&bytes).map_err(|e| StorageError::Integrity(e.to_string()))?;
        let meta = SlotMetadata {
            schema_version: header.schema_version,
            timestamp: info.modified,
            description: info.description,
            locations: self.location(),
            checksum: header.checksum,
            origin: info.origin.unwrap_or_else(DeviceId::unknown),
        };
        self.write(archive, &bytes, &meta, &NoopObserver).await
    }
}
