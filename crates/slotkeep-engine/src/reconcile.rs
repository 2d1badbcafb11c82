//! Execution of resolution plans against the attached backends.

use slotkeep_container::SaveSchema;
use slotkeep_scheduler::TaskContext;
use slotkeep_store::{CloudBackend, CloudKey, StorageBackend, StorageError};
use slotkeep_sync::{ResolutionPlan, SyncAction};
use slotkeep_types::{DeviceId, Location, SaveDataInfo, SlotMetadata, SlotName, Timestamp};
use tracing::debug;

use crate::engine::EngineInner;
use crate::error::EngineResult;
use crate::index::IndexUpdate;
use crate::observer::PhaseObserver;

/// Share of sync progress spent before the first action runs.
const PLAN_START: f32 = 0.3;

pub(crate) fn action_phase(action: &SyncAction) -> &'static str {
    match action {
        SyncAction::ArchiveLocal { .. } => "archive-local",
        SyncAction::ArchiveRemote { .. } => "archive-remote",
        SyncAction::CopyRemote { .. } => "copy-remote",
        SyncAction::Upload => "upload",
        SyncAction::Download { .. } => "download",
        SyncAction::PruneRemote { .. } => "prune-remote",
    }
}

/// Metadata for re-writing a container somewhere else.
fn metadata_for(
    bytes: &[u8],
    timestamp: Timestamp,
    origin: DeviceId,
    description: String,
    locations: Location,
) -> EngineResult<SlotMetadata> {
    let header = SaveSchema::inspect(bytes)?;
    Ok(SlotMetadata {
        schema_version: header.schema_version,
        timestamp,
        description,
        locations,
        checksum: header.checksum,
        origin,
    })
}

fn parse_key(key: &str) -> EngineResult<CloudKey> {
    CloudKey::parse(key)
        .ok_or_else(|| StorageError::Integrity(format!("unparseable cloud key {key}")).into())
}

impl EngineInner {
    /// Apply every action of `plan` in order. Cancellation is checked
    /// between actions and inside transfers.
    pub(crate) async fn execute_plan(
        &self,
        ctx: &TaskContext,
        slot: &SlotName,
        plan: &ResolutionPlan,
    ) -> EngineResult<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let local = self.local()?;
        let cloud: &CloudBackend = self.cloud()?;
        let step = (1.0 - PLAN_START) / plan.actions.len() as f32;

        for (i, action) in plan.actions.iter().enumerate() {
            ctx.checkpoint()?;
            let observer = PhaseObserver::new(ctx, PLAN_START + step * i as f32, step, action_phase(action));
            observer.begin();
            debug!(%slot, action = action_phase(action), "applying sync action");

            match action {
                SyncAction::ArchiveLocal { to } => {
                    let info = local.archive(slot, to).await?;
                    self.index.apply(IndexUpdate::Stored(info));
                }
                SyncAction::ArchiveRemote { key, to } => {
                    let bytes = self.fetch_version(ctx, cloud, key).await?;
                    let parsed = parse_key(key)?;
                    let meta = metadata_for(&bytes, parsed.timestamp, parsed.device, String::new(), Location::Cloud)?;
                    let info = self.put_cloud(ctx, cloud, to, &bytes, &meta, &observer).await?;
                    self.index.apply(IndexUpdate::Stored(info));
                }
                SyncAction::CopyRemote { key, to } => {
                    let bytes = self.fetch_version(ctx, cloud, key).await?;
                    let parsed = parse_key(key)?;
                    let meta = metadata_for(&bytes, parsed.timestamp, parsed.device, String::new(), Location::Both)?;
                    let info = local.write(to, &bytes, &meta, &observer).await?;
                    self.index.apply(IndexUpdate::Stored(info));
                    let info = self.put_cloud(ctx, cloud, to, &bytes, &meta, &observer).await?;
                    self.index.apply(IndexUpdate::Stored(info));
                }
                SyncAction::Upload => {
                    let bytes = local.read(slot).await?;
                    let current = local.info(slot).await?;
                    let meta = metadata_for(
                        &bytes,
                        current.modified,
                        current.origin.clone().unwrap_or_else(|| self.device.clone()),
                        current.description.clone(),
                        Location::Both,
                    )?;
                    let info = self.put_cloud(ctx, cloud, slot, &bytes, &meta, &observer).await?;
                    self.index.apply(IndexUpdate::Stored(info));
                }
                SyncAction::Download { key } => {
                    let bytes = self.fetch_version(ctx, cloud, key).await?;
                    let parsed = parse_key(key)?;
                    let meta = metadata_for(&bytes, parsed.timestamp, parsed.device, String::new(), Location::Both)?;
                    let info = local.write(slot, &bytes, &meta, &observer).await?;
                    self.index.apply(IndexUpdate::Stored(info));
                }
                SyncAction::PruneRemote { keys } => {
                    let keys = keys.as_slice();
                    let pruned = self
                        .cloud_call(ctx.token(), "prune", move || cloud.delete_versions(keys))
                        .await?;
                    debug!(%slot, pruned, "remote versions pruned");
                }
            }
        }
        Ok(())
    }

    async fn fetch_version(&self, ctx: &TaskContext, cloud: &CloudBackend, key: &str) -> EngineResult<Vec<u8>> {
        self.cloud_call(ctx.token(), "read-version", move || cloud.read_version(key))
            .await
    }

    async fn put_cloud(
        &self,
        ctx: &TaskContext,
        cloud: &CloudBackend,
        slot: &SlotName,
        bytes: &[u8],
        meta: &SlotMetadata,
        observer: &PhaseObserver<'_>,
    ) -> EngineResult<SaveDataInfo> {
        self.cloud_call(ctx.token(), "upload", move || cloud.write(slot, bytes, meta, observer))
            .await
    }
}

#[cfg(test)]
mod tests {
    use slotkeep_codec::Snapshot;
    use slotkeep_container::MigrationChain;

    use super::*;

    #[test]
    fn metadata_comes_from_the_container_header() {
        let schema = SaveSchema::new(MigrationChain::new(3));
        let blob = schema.seal(&Snapshot::new().with("hp", 1i64)).unwrap();
        let meta = metadata_for(
            &blob.to_bytes(),
            Timestamp::from_millis(42),
            DeviceId::new("deck").unwrap(),
            "autosave".into(),
            Location::Cloud,
        )
        .unwrap();
        assert_eq!(meta.schema_version, 3);
        assert_eq!(meta.checksum, blob.checksum());
        assert_eq!(meta.timestamp, Timestamp::from_millis(42));
        assert!(metadata_for(b"garbage", Timestamp::zero(), DeviceId::unknown(), String::new(), Location::Local).is_err());
    }

    #[test]
    fn cloud_keys_must_parse() {
        let key = parse_key("player/Profile1/deck-1700000000000").unwrap();
        assert_eq!(key.device.as_str(), "deck");
        assert_eq!(key.timestamp, Timestamp::from_millis(1_700_000_000_000));
        assert!(parse_key("no-slashes").is_err());
    }

    #[test]
    fn every_action_has_a_phase() {
        let slot = SlotName::new("s").unwrap();
        let actions = [
            SyncAction::ArchiveLocal { to: slot.clone() },
            SyncAction::Upload,
            SyncAction::PruneRemote { keys: vec![] },
        ];
        let phases: Vec<&str> = actions.iter().map(action_phase).collect();
        assert_eq!(phases, vec!["archive-local", "upload", "prune-remote"]);
    }
}
