use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use slotkeep_container::format::peek_header;
use slotkeep_types::{DeviceId, Location, RemoteVersion, SaveDataInfo, SlotMetadata, SlotName, Timestamp, UserId};
use tracing::{debug, warn};

use crate::client::BlobClient;
use crate::error::{StorageError, StorageResult};
use crate::traits::{StorageBackend, TransferObserver};

/// Marker that opens the trailer of every completely uploaded object.
pub const TRAILER_MAGIC: &[u8; 8] = b"SKTRAIL1";

/// magic + BLAKE3 of the body
pub const TRAILER_LEN: usize = 8 + 32;

/// Listings re-resolved when the chosen version is pruned mid-read.
const READ_ATTEMPTS: usize = 3;

/// Default upload chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Parsed cloud object key: `{user}/{slot}/{device}-{millis}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CloudKey {
    pub user: UserId,
    pub slot: SlotName,
    pub device: DeviceId,
    pub timestamp: Timestamp,
}

impl CloudKey {
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, '/');
        let user = UserId::new(parts.next()?).ok()?;
        let slot = SlotName::new(parts.next()?).ok()?;
        let (device, millis) = parts.next()?.rsplit_once('-')?;
        Some(Self {
            user,
            slot,
            device: DeviceId::new(device).ok()?,
            timestamp: Timestamp::from_millis(millis.parse().ok()?),
        })
    }
}

impl fmt::Display for CloudKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}-{}",
            self.user,
            self.slot,
            self.device,
            self.timestamp.as_millis()
        )
    }
}

/// Split a stored object into its body if the trailer is present and valid.
pub fn verify_trailer(object: &[u8]) -> Option<&[u8]> {
    if object.len() < TRAILER_LEN {
        return None;
    }
    let (body, trailer) = object.split_at(object.len() - TRAILER_LEN);
    if &trailer[..8] != TRAILER_MAGIC {
        return None;
    }
    let digest = blake3::hash(body);
    (digest.as_bytes() == &trailer[8..]).then_some(body)
}

fn trailer_for(hasher: &blake3::Hasher) -> Vec<u8> {
    let mut trailer = Vec::with_capacity(TRAILER_LEN);
    trailer.extend_from_slice(TRAILER_MAGIC);
    trailer.extend_from_slice(hasher.finalize().as_bytes());
    trailer
}

/// Versioned remote backend.
///
/// Every write creates a new object; nothing is overwritten in place. The
/// current copy of a slot is its newest *complete* version. Older versions
/// from this device are pruned after a successful upload; versions from
/// other devices stay until a sync resolves them.
pub struct CloudBackend {
    client: Arc<dyn BlobClient>,
    user: UserId,
    device: DeviceId,
    chunk_size: usize,
}

impl CloudBackend {
    pub fn new(client: Arc<dyn BlobClient>, user: UserId, device: DeviceId) -> Self {
        Self {
            client,
            user,
            device,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn client(&self) -> &Arc<dyn BlobClient> {
        &self.client
    }

    fn slot_prefix(&self, slot: &SlotName) -> String {
        format!("{}/{slot}/", self.user)
    }

    /// Every version of `slot`, oldest first. Incomplete uploads are included
    /// with `complete == false`.
    pub async fn versions(&self, slot: &SlotName) -> StorageResult<Vec<RemoteVersion>> {
        let objects = self.client.list(&self.slot_prefix(slot)).await?;
        let mut versions = Vec::with_capacity(objects.len());
        for object in objects {
            let Some(key) = CloudKey::parse(&object.key) else {
                debug!(key = %object.key, "skipping unparseable object key");
                continue;
            };
            if &key.slot != slot {
                continue;
            }
            let raw = match self.client.get(&object.key).await {
                Ok(raw) => raw,
                // Pruned by another device between list and get.
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            versions.push(describe(&object.key, key, &raw));
        }
        versions.sort_by(|a, b| (a.timestamp, &a.origin).cmp(&(b.timestamp, &b.origin)));
        Ok(versions)
    }

    /// Newest complete version of `slot`.
    pub async fn latest(&self, slot: &SlotName) -> StorageResult<RemoteVersion> {
        self.versions(slot)
            .await?
            .into_iter()
            .rev()
            .find(|v| v.complete)
            .ok_or_else(|| StorageError::NotFound(slot.to_string()))
    }

    /// Body of one specific version. Fails with `Integrity` if the upload
    /// never completed.
    pub async fn read_version(&self, key: &str) -> StorageResult<Vec<u8>> {
        let raw = self.client.get(key).await?;
        verify_trailer(&raw)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| StorageError::Integrity(format!("object {key} has no valid trailer")))
    }

    /// Upload a new version and return it.
    pub async fn upload(
        &self,
        slot: &SlotName,
        bytes: &[u8],
        meta: &SlotMetadata,
        observer: &dyn TransferObserver,
    ) -> StorageResult<RemoteVersion> {
        let existing = self.versions(slot).await?;
        let own_latest = existing
            .iter()
            .filter(|v| v.origin == self.device)
            .map(|v| v.timestamp)
            .max();
        // Keys must be unique per device even for saves in the same millisecond.
        let timestamp = match own_latest {
            Some(t) if t >= meta.timestamp => Timestamp::from_millis(t.as_millis() + 1),
            _ => meta.timestamp,
        };
        let key = CloudKey {
            user: self.user.clone(),
            slot: slot.clone(),
            device: self.device.clone(),
            timestamp,
        }
        .to_string();

        let total = bytes.len() as u64;
        let mut hasher = blake3::Hasher::new();
        let mut done = 0u64;
        let mut chunks = bytes.chunks(self.chunk_size).peekable();
        if chunks.peek().is_none() {
            self.client.put(&key, &[]).await?;
        }
        for (index, chunk) in chunks.enumerate() {
            if observer.is_cancelled() {
                debug!(%slot, %key, done, total, "cloud upload abandoned");
                return Err(StorageError::Cancelled);
            }
            if index == 0 {
                self.client.put(&key, chunk).await?;
            } else {
                self.client.append(&key, chunk).await?;
            }
            hasher.update(chunk);
            done += chunk.len() as u64;
            observer.on_progress(done, total);
        }
        if observer.is_cancelled() {
            debug!(%slot, %key, "cloud upload abandoned before trailer");
            return Err(StorageError::Cancelled);
        }
        self.client.append(&key, &trailer_for(&hasher)).await?;
        debug!(%slot, %key, bytes = total, "cloud upload committed");

        for old in existing.iter().filter(|v| v.origin == self.device && v.key != key) {
            if let Err(e) = self.client.delete(&old.key).await {
                warn!(key = %old.key, error = %e, "failed to prune superseded version");
            }
        }

        Ok(RemoteVersion {
            key,
            slot: slot.clone(),
            origin: self.device.clone(),
            timestamp,
            size: total,
            checksum: Some(meta.checksum),
            complete: true,
        })
    }

    /// Delete the given version keys. Keys that are already gone count as
    /// deleted. Returns how many were requested.
    pub async fn delete_versions(&self, keys: &[String]) -> StorageResult<usize> {
        for key in keys {
            self.client.delete(key).await?;
            debug!(%key, "remote version pruned");
        }
        Ok(keys.len())
    }
}

fn describe(raw_key: &str, key: CloudKey, raw: &[u8]) -> RemoteVersion {
    let body = verify_trailer(raw);
    RemoteVersion {
        key: raw_key.to_string(),
        slot: key.slot,
        origin: key.device,
        timestamp: key.timestamp,
        size: body.map_or(raw.len(), <[u8]>::len) as u64,
        checksum: body.and_then(|b| peek_header(b).ok()).map(|h| h.checksum),
        complete: body.is_some(),
    }
}

#[async_trait]
impl StorageBackend for CloudBackend {
    fn location(&self) -> Location {
        Location::Cloud
    }

    async fn write(
        &self,
        slot: &SlotName,
        bytes: &[u8],
        meta: &SlotMetadata,
        observer: &dyn TransferObserver,
    ) -> StorageResult<SaveDataInfo> {
        let version = self.upload(slot, bytes, meta, observer).await?;
        Ok(version
            .to_info()
            .with_schema_version(meta.schema_version)
            .with_description(meta.description.clone()))
    }

    async fn read(&self, slot: &SlotName) -> StorageResult<Vec<u8>> {
        for _ in 0..READ_ATTEMPTS {
            let latest = self.latest(slot).await?;
            match self.read_version(&latest.key).await {
                // Superseded and pruned after the listing; look again.
                Err(StorageError::NotFound(_)) => {
                    debug!(%slot, key = %latest.key, "version vanished before read");
                }
                other => return other,
            }
        }
        Err(StorageError::NotFound(slot.to_string()))
    }

    async fn delete(&self, slot: &SlotName) -> StorageResult<()> {
        let objects = self.client.list(&self.slot_prefix(slot)).await?;
        if objects.is_empty() {
            return Err(StorageError::NotFound(slot.to_string()));
        }
        for object in objects {
            self.client.delete(&object.key).await?;
        }
        debug!(%slot, "cloud slot deleted");
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<SaveDataInfo>> {
        let objects = self.client.list(&format!("{}/", self.user)).await?;
        let mut by_slot: BTreeMap<SlotName, Vec<(CloudKey, String)>> = BTreeMap::new();
        for object in objects {
            if let Some(key) = CloudKey::parse(&object.key) {
                by_slot.entry(key.slot.clone()).or_default().push((key, object.key));
            }
        }

        let mut infos = Vec::with_capacity(by_slot.len());
        for (_, mut keys) in by_slot {
            keys.sort_by(|a, b| (b.0.timestamp, &b.0.device).cmp(&(a.0.timestamp, &a.0.device)));
            for (key, raw_key) in keys {
                let raw = match self.client.get(&raw_key).await {
                    Ok(raw) => raw,
                    Err(StorageError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                let version = describe(&raw_key, key, &raw);
                if version.complete {
                    let mut info = version.to_info();
                    info.schema_version = verify_trailer(&raw)
                        .and_then(|b| peek_header(b).ok())
                        .map(|h| h.schema_version);
                    infos.push(info);
                    break;
                }
            }
        }
        Ok(infos)
    }

    async fn info(&self, slot: &SlotName) -> StorageResult<SaveDataInfo> {
        let latest = self.latest(slot).await?;
        let body = self.read_version(&latest.key).await?;
        let mut info = latest.to_info();
        info.schema_version = peek_header(&body).ok().map(|h| h.schema_version);
        Ok(info)
    }

    async fn availability(&self) -> bool {
        self.client.ping().await.is_ok()
    }
}
