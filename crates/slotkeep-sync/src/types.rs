use std::fmt;

use serde::{Deserialize, Serialize};
use slotkeep_types::{Checksum, DeviceId, RemoteVersion, SaveDataInfo, SlotName, Timestamp};

/// Explicit decision for an escalated conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    /// Keep the local copy under the slot name and the remote copy as a
    /// separate slot.
    KeepBoth,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KeepLocal => "keep-local",
            Self::KeepRemote => "keep-remote",
            Self::KeepBoth => "keep-both",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-local" | "local" => Ok(Self::KeepLocal),
            "keep-remote" | "remote" => Ok(Self::KeepRemote),
            "keep-both" | "both" => Ok(Self::KeepBoth),
            other => Err(format!("unknown resolution {other:?}")),
        }
    }
}

/// Where a divergent version lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSource {
    Local,
    Remote { key: String },
}

/// One side of a conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergentVersion {
    pub source: VersionSource,
    pub origin: DeviceId,
    pub timestamp: Timestamp,
    pub checksum: Option<Checksum>,
    pub size: u64,
}

impl DivergentVersion {
    pub fn from_local(info: &SaveDataInfo) -> Self {
        Self {
            source: VersionSource::Local,
            origin: info.origin.clone().unwrap_or_else(DeviceId::unknown),
            timestamp: info.modified,
            checksum: info.checksum,
            size: info.size,
        }
    }

    pub fn from_remote(version: &RemoteVersion) -> Self {
        Self {
            source: VersionSource::Remote {
                key: version.key.clone(),
            },
            origin: version.origin.clone(),
            timestamp: version.timestamp,
            checksum: version.checksum,
            size: version.size,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, VersionSource::Local)
    }
}

/// Divergence that needs an explicit decision.
///
/// Transient: created when a sync detects the divergence and dropped once a
/// resolution has been committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub slot: SlotName,
    pub versions: Vec<DivergentVersion>,
    pub outcome: Option<Resolution>,
    pub detected_at: Timestamp,
    /// Why the default policy escalated.
    pub reason: String,
}

impl ConflictRecord {
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn local(&self) -> Option<&DivergentVersion> {
        self.versions.iter().find(|v| v.is_local())
    }

    pub fn remotes(&self) -> impl Iterator<Item = &DivergentVersion> {
        self.versions.iter().filter(|v| !v.is_local())
    }
}

/// Result of comparing the local copy with the remote versions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assessment {
    /// Neither side has a copy.
    Absent,
    InSync,
    /// Only the local copy exists (or every remote upload is incomplete).
    LocalOnly,
    /// Only remote versions exist; `version` is the newest complete one.
    RemoteOnly { version: RemoteVersion },
    /// The default policy picked a winner.
    AutoResolve { resolution: Resolution, reason: String },
    /// Escalated; waits for an explicit decision.
    Conflict(ConflictRecord),
}

/// One step of a resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum SyncAction {
    /// Copy the local container to `to` on the local backend.
    ArchiveLocal { to: SlotName },
    /// Copy a remote version to `to` in the cloud.
    ArchiveRemote { key: String, to: SlotName },
    /// Copy a remote version into the separate slot `to` on both backends.
    CopyRemote { key: String, to: SlotName },
    /// Upload the local container as the newest remote version.
    Upload,
    /// Replace the local container with a remote version.
    Download { key: String },
    /// Delete remote versions that are now archived or superseded.
    PruneRemote { keys: Vec<String> },
}

/// Ordered actions that bring both sides of one slot into agreement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub resolution: Option<Resolution>,
    pub actions: Vec<SyncAction>,
}

impl ResolutionPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Slot names this plan creates as archives or copies.
    pub fn archives(&self) -> Vec<&SlotName> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                SyncAction::ArchiveLocal { to }
                | SyncAction::ArchiveRemote { to, .. }
                | SyncAction::CopyRemote { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}
