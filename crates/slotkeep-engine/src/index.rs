use std::collections::BTreeMap;
use std::sync::Mutex;

use slotkeep_types::{Location, SaveDataInfo, SlotName, SyncState};
use tracing::trace;

/// A mutation of the slot index. Every change goes through
/// [`SlotIndex::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexUpdate {
    /// A backend committed a write. `info.location` names the backend.
    Stored(SaveDataInfo),
    /// The slot was removed from the given backends.
    Removed { slot: SlotName, location: Location },
    /// Fresh per-backend entries for one slot; `None` means absent there.
    Refreshed {
        slot: SlotName,
        local: Option<SaveDataInfo>,
        cloud: Option<SaveDataInfo>,
    },
    /// A complete listing of one backend replaces what was known about it.
    Listed {
        location: Location,
        entries: Vec<SaveDataInfo>,
    },
    /// A sync escalated (or settled) a conflict on the slot.
    Conflict { slot: SlotName, pending: bool },
}

#[derive(Clone, Debug, Default)]
struct Entry {
    local: Option<SaveDataInfo>,
    cloud: Option<SaveDataInfo>,
    conflicted: bool,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.local.is_none() && self.cloud.is_none()
    }

    fn merged(&self) -> Option<SaveDataInfo> {
        let mut info = match (&self.local, &self.cloud) {
            (None, None) => return None,
            (Some(local), None) => {
                let mut info = local.clone();
                info.location = Location::Local;
                info.sync_state = SyncState::LocalOnly;
                info
            }
            (None, Some(cloud)) => {
                let mut info = cloud.clone();
                info.location = Location::Cloud;
                info.sync_state = SyncState::CloudOnly;
                info
            }
            (Some(local), Some(cloud)) => {
                let mut info = local.clone();
                info.location = Location::Both;
                info.sync_state = if local.same_content(cloud) {
                    SyncState::Synced
                } else {
                    SyncState::Diverged
                };
                info
            }
        };
        if self.conflicted {
            info.sync_state = SyncState::Conflicted;
        }
        Some(info)
    }
}

/// Cached view of every known slot across both backends.
///
/// Guarded by a single mutex; readers get merged copies.
#[derive(Debug, Default)]
pub struct SlotIndex {
    entries: Mutex<BTreeMap<SlotName, Entry>>,
}

impl SlotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, update: IndexUpdate) {
        trace!(?update, "index update");
        let mut entries = self.entries.lock().expect("index lock poisoned");
        match update {
            IndexUpdate::Stored(info) => {
                let entry = entries.entry(info.slot.clone()).or_default();
                if info.location.includes_local() {
                    entry.local = Some(info.clone());
                }
                if info.location.includes_cloud() {
                    entry.cloud = Some(info);
                }
            }
            IndexUpdate::Removed { slot, location } => {
                if let Some(entry) = entries.get_mut(&slot) {
                    if location.includes_local() {
                        entry.local = None;
                    }
                    if location.includes_cloud() {
                        entry.cloud = None;
                    }
                    if entry.is_empty() {
                        entries.remove(&slot);
                    }
                }
            }
            IndexUpdate::Refreshed { slot, local, cloud } => {
                let entry = entries.entry(slot.clone()).or_default();
                entry.local = local;
                entry.cloud = cloud;
                if entry.is_empty() {
                    entries.remove(&slot);
                }
            }
            IndexUpdate::Listed { location, entries: listed } => {
                for entry in entries.values_mut() {
                    if location.includes_local() {
                        entry.local = None;
                    }
                    if location.includes_cloud() {
                        entry.cloud = None;
                    }
                }
                for info in listed {
                    let entry = entries.entry(info.slot.clone()).or_default();
                    if location.includes_local() {
                        entry.local = Some(info.clone());
                    }
                    if location.includes_cloud() {
                        entry.cloud = Some(info);
                    }
                }
                entries.retain(|_, e| !e.is_empty() || e.conflicted);
            }
            IndexUpdate::Conflict { slot, pending } => {
                if let Some(entry) = entries.get_mut(&slot) {
                    entry.conflicted = pending;
                }
            }
        }
    }

    /// Merged entry for one slot.
    pub fn get(&self, slot: &SlotName) -> Option<SaveDataInfo> {
        let entries = self.entries.lock().expect("index lock poisoned");
        entries.get(slot).and_then(Entry::merged)
    }

    /// Merged entries sorted by slot name, optionally only those present at
    /// `location`.
    pub fn list(&self, location: Option<Location>) -> Vec<SaveDataInfo> {
        let entries = self.entries.lock().expect("index lock poisoned");
        entries
            .values()
            .filter_map(Entry::merged)
            .filter(|info| match location {
                None | Some(Location::Both) => true,
                Some(Location::Local) => info.location.includes_local(),
                Some(Location::Cloud) => info.location.includes_cloud(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
