use std::fmt;

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::TypeError;
use crate::identity::DeviceId;
use crate::temporal::Timestamp;

/// Maximum length of a slot name in bytes (archive names included).
pub const MAX_SLOT_NAME_LEN: usize = 200;

/// Infix that marks a slot as the archived loser of a conflict.
pub const CONFLICT_INFIX: &str = ".conflict-";

// ---------------------------------------------------------------------------
// SlotName
// ---------------------------------------------------------------------------

/// Validated save slot key.
///
/// Slot names become file names on the local backend and path segments of
/// cloud keys, so they may not contain path separators or control
/// characters, and may not start with `.` (reserved for temporary files).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotName(String);

impl SlotName {
    /// Validate and wrap a slot name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        let fail = |reason: &str| TypeError::InvalidSlotName {
            name: name.clone(),
            reason: reason.to_string(),
        };
        if name.is_empty() {
            return Err(fail("empty"));
        }
        if name.len() > MAX_SLOT_NAME_LEN {
            return Err(fail("too long"));
        }
        if name.starts_with('.') {
            return Err(fail("must not start with '.'"));
        }
        if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            return Err(fail("contains a path separator or control character"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name under which a rejected conflict version of this slot is archived:
    /// `<slot>.conflict-<origin>-<millis>`.
    pub fn archive_name(&self, origin: &str, at: Timestamp) -> Result<SlotName, TypeError> {
        SlotName::new(format!("{}{CONFLICT_INFIX}{origin}-{}", self.0, at.as_millis()))
    }

    /// Returns `true` if this slot is a conflict archive.
    pub fn is_archive(&self) -> bool {
        self.0.contains(CONFLICT_INFIX)
    }

    /// For an archive slot, the name of the slot it was archived from.
    pub fn archive_base(&self) -> Option<&str> {
        self.0.find(CONFLICT_INFIX).map(|idx| &self.0[..idx])
    }
}

impl fmt::Debug for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotName({})", self.0)
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SlotName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SlotName {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SlotName> for String {
    fn from(value: SlotName) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Location / SyncState
// ---------------------------------------------------------------------------

/// Where a slot lives, or where an operation should go.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Local,
    Cloud,
    Both,
}

impl Location {
    pub fn includes_local(&self) -> bool {
        matches!(self, Self::Local | Self::Both)
    }

    pub fn includes_cloud(&self) -> bool {
        matches!(self, Self::Cloud | Self::Both)
    }

    /// Union of two locations.
    pub fn merge(self, other: Location) -> Location {
        let local = self.includes_local() || other.includes_local();
        let cloud = self.includes_cloud() || other.includes_cloud();
        match (local, cloud) {
            (true, true) => Self::Both,
            (false, true) => Self::Cloud,
            _ => Self::Local,
        }
    }

    /// Remove `other` from this location. Returns `None` when nothing is left.
    pub fn without(self, other: Location) -> Option<Location> {
        let local = self.includes_local() && !other.includes_local();
        let cloud = self.includes_cloud() && !other.includes_cloud();
        match (local, cloud) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Local),
            (false, true) => Some(Self::Cloud),
            (false, false) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cloud => write!(f, "cloud"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for Location {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            "both" => Ok(Self::Both),
            other => Err(TypeError::InvalidIdentifier {
                value: other.to_string(),
                reason: "expected local, cloud or both".into(),
            }),
        }
    }
}

/// Relationship between the local and cloud copies of a slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Both copies exist with equal checksums.
    Synced,
    LocalOnly,
    CloudOnly,
    /// Both copies exist and differ; not yet examined by the resolver.
    Diverged,
    /// The resolver escalated; a decision is pending.
    Conflicted,
    #[default]
    Unknown,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Synced => "synced",
            Self::LocalOnly => "local-only",
            Self::CloudOnly => "cloud-only",
            Self::Diverged => "diverged",
            Self::Conflicted => "conflicted",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// SlotMetadata / SaveSlot
// ---------------------------------------------------------------------------

/// Metadata persisted alongside a slot until it is explicitly deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub schema_version: u32,
    pub timestamp: Timestamp,
    pub description: String,
    pub locations: Location,
    pub checksum: Checksum,
    pub origin: DeviceId,
}

/// A named save location plus its metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSlot {
    pub name: SlotName,
    pub metadata: SlotMetadata,
}

// ---------------------------------------------------------------------------
// SaveDataInfo
// ---------------------------------------------------------------------------

/// Listing entry for one slot as seen by a backend (or by the merged index).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDataInfo {
    pub slot: SlotName,
    /// Size of the stored container in bytes.
    pub size: u64,
    pub modified: Timestamp,
    pub location: Location,
    pub sync_state: SyncState,
    pub checksum: Option<Checksum>,
    pub origin: Option<DeviceId>,
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub description: String,
}

impl SaveDataInfo {
    /// Minimal entry; optional fields start empty.
    pub fn new(slot: SlotName, size: u64, modified: Timestamp, location: Location) -> Self {
        let sync_state = match location {
            Location::Local => SyncState::LocalOnly,
            Location::Cloud => SyncState::CloudOnly,
            Location::Both => SyncState::Unknown,
        };
        Self {
            slot,
            size,
            modified,
            location,
            sync_state,
            checksum: None,
            origin: None,
            schema_version: None,
            description: String::new(),
        }
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_origin(mut self, origin: DeviceId) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns `true` when both entries carry checksums and they match.
    pub fn same_content(&self, other: &SaveDataInfo) -> bool {
        matches!((self.checksum, other.checksum), (Some(a), Some(b)) if a == b)
    }
}

// ---------------------------------------------------------------------------
// RemoteVersion
// ---------------------------------------------------------------------------

/// One versioned cloud object belonging to a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVersion {
    /// Full object key: `{user}/{slot}/{device}-{timestamp}`.
    pub key: String,
    pub slot: SlotName,
    pub origin: DeviceId,
    pub timestamp: Timestamp,
    pub size: u64,
    pub checksum: Option<Checksum>,
    /// `true` when the trailing integrity marker is present and valid.
    pub complete: bool,
}

impl RemoteVersion {
    /// Project this version into a listing entry.
    pub fn to_info(&self) -> SaveDataInfo {
        let mut info = SaveDataInfo::new(self.slot.clone(), self.size, self.timestamp, Location::Cloud)
            .with_origin(self.origin.clone());
        info.checksum = self.checksum;
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str) -> SlotName {
        SlotName::new(name).unwrap()
    }

    #[test]
    fn slot_name_validation() {
        assert!(SlotName::new("Profile1").is_ok());
        assert!(SlotName::new("auto save 3").is_ok());
        assert!(SlotName::new("").is_err());
        assert!(SlotName::new(".hidden").is_err());
        assert!(SlotName::new("a/b").is_err());
        assert!(SlotName::new("a\\b").is_err());
        assert!(SlotName::new("tab\there").is_err());
        assert!(SlotName::new("x".repeat(MAX_SLOT_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn archive_names() {
        let s = slot("Slot_A");
        let archived = s.archive_name("laptop", Timestamp::from_millis(1234)).unwrap();
        assert_eq!(archived.as_str(), "Slot_A.conflict-laptop-1234");
        assert!(archived.is_archive());
        assert_eq!(archived.archive_base(), Some("Slot_A"));
        assert!(!s.is_archive());
        assert_eq!(s.archive_base(), None);
    }

    #[test]
    fn location_merge_and_without() {
        assert_eq!(Location::Local.merge(Location::Cloud), Location::Both);
        assert_eq!(Location::Cloud.merge(Location::Cloud), Location::Cloud);
        assert_eq!(Location::Both.without(Location::Local), Some(Location::Cloud));
        assert_eq!(Location::Local.without(Location::Both), None);
        assert_eq!(Location::Cloud.without(Location::Local), Some(Location::Cloud));
    }

    #[test]
    fn location_parse_and_display() {
        for loc in [Location::Local, Location::Cloud, Location::Both] {
            let parsed: Location = loc.to_string().parse().unwrap();
            assert_eq!(parsed, loc);
        }
        assert!("elsewhere".parse::<Location>().is_err());
    }

    #[test]
    fn info_sync_state_follows_location() {
        let info = SaveDataInfo::new(slot("a"), 10, Timestamp::zero(), Location::Cloud);
        assert_eq!(info.sync_state, SyncState::CloudOnly);
        let info = SaveDataInfo::new(slot("a"), 10, Timestamp::zero(), Location::Local);
        assert_eq!(info.sync_state, SyncState::LocalOnly);
    }

    #[test]
    fn same_content_requires_both_checksums() {
        let a = SaveDataInfo::new(slot("a"), 1, Timestamp::zero(), Location::Local)
            .with_checksum(Checksum::from_digest([1; 32]));
        let b = SaveDataInfo::new(slot("a"), 1, Timestamp::zero(), Location::Cloud)
            .with_checksum(Checksum::from_digest([1; 32]));
        let c = SaveDataInfo::new(slot("a"), 1, Timestamp::zero(), Location::Cloud);
        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }

    proptest::proptest! {
        #[test]
        fn archive_base_recovers_slot(name in "[A-Za-z0-9_ ]{1,40}", millis in 0u64..4_000_000_000_000) {
            let s = SlotName::new(name.clone()).unwrap();
            let archived = s.archive_name("dev-1", Timestamp::from_millis(millis)).unwrap();
            proptest::prop_assert!(archived.is_archive());
            proptest::prop_assert_eq!(archived.archive_base(), Some(name.as_str()));
        }
    }

    #[test]
    fn slot_name_serde_validates() {
        let ok: SlotName = serde_json::from_str("\"Profile1\"").unwrap();
        assert_eq!(ok.as_str(), "Profile1");
        assert!(serde_json::from_str::<SlotName>("\"../etc\"").is_err());
    }
}
