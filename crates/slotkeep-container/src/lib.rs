//! Versioned save containers for Slotkeep.
//!
//! A container wraps an encoded snapshot payload in a fixed header:
//!
//! ```text
//! [magic "SLOTKEEP": 8][schema version: u32][SHA-256: 32][payload length: u64][payload]
//! ```
//!
//! Opening a container verifies the whole header before a single payload
//! byte is decoded, then migrates older payloads forward one version at a
//! time and runs the registered validation rules. [`SaveSchema`] bundles
//! these steps behind `seal` / `open`.

pub mod error;
pub mod format;
pub mod migration;
pub mod schema;
pub mod validation;

pub use error::{ContainerError, ContainerResult};
pub use format::{Blob, Header, HEADER_LEN, MAGIC};
pub use migration::MigrationChain;
pub use schema::{LoadedSnapshot, SaveSchema};
pub use validation::{
    AppliedCorrection, Correction, FieldRule, ValidationReport, Validator, Violation,
    ViolationKind,
};
