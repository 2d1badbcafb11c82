//! Storage backends for Slotkeep save containers.
//!
//! Two backends implement [`StorageBackend`]:
//!
//! - [`LocalBackend`]: a directory of `<slot>.sav` files with JSON sidecars.
//!   Writes go to a temporary file, are flushed to disk, then renamed over
//!   the previous copy, so readers only ever see a complete container.
//! - [`CloudBackend`]: versioned objects keyed `{user}/{slot}/{device}-{ms}`
//!   in a remote blob store reached through a [`BlobClient`]. Each object
//!   ends with a trailing marker; objects without a valid marker are
//!   incomplete uploads and are ignored.
//!
//! Backends never decode payloads. They move opaque container bytes and
//! report [`slotkeep_types::SaveDataInfo`] listings.

pub mod client;
pub mod cloud;
pub mod directory;
pub mod error;
pub mod local;
pub mod memory;
pub mod traits;

pub use client::{BlobClient, ObjectInfo};
pub use cloud::{CloudBackend, CloudKey, TRAILER_LEN, TRAILER_MAGIC};
pub use directory::DirectoryBlobClient;
pub use error::{StorageError, StorageResult};
pub use local::LocalBackend;
pub use memory::InMemoryBlobClient;
pub use traits::{NoopObserver, StorageBackend, TransferObserver};
