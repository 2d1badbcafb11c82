//! Foundation types for Slotkeep.
//!
//! Every other Slotkeep crate depends on `slotkeep-types`. It carries no I/O
//! and no async code: only the identifiers and metadata records that travel
//! between the codec, the storage backends, the conflict resolver and the
//! engine.
//!
//! # Key Types
//!
//! - [`SlotName`]: validated save slot key
//! - [`UserId`] / [`DeviceId`]: identifiers used in cloud object keys
//! - [`Timestamp`]: millisecond wall-clock stamp attached to every save
//! - [`Checksum`]: SHA-256 digest of a container payload
//! - [`SaveSlot`] / [`SlotMetadata`]: persisted slot metadata
//! - [`SaveDataInfo`]: per-backend listing entry
//! - [`RemoteVersion`]: one versioned cloud object of a slot

pub mod checksum;
pub mod error;
pub mod identity;
pub mod slot;
pub mod temporal;

pub use checksum::Checksum;
pub use error::TypeError;
pub use identity::{DeviceId, UserId};
pub use slot::{
    Location, RemoteVersion, SaveDataInfo, SaveSlot, SlotMetadata, SlotName, SyncState,
};
pub use temporal::Timestamp;
