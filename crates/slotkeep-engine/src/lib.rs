//! Slotkeep persistence engine.
//!
//! [`PersistenceEngine`] ties the pieces together: producers hand it
//! snapshots, the [`SaveSchema`] seals them into versioned containers, the
//! scheduler runs every save, load, sync and delete as a single-flight task
//! per slot, and the storage backends keep the bytes. Sync compares the
//! local copy with the cloud versions and either applies the last writer or
//! waits for an explicit [`Resolution`].
//!
//! # Lifecycle
//!
//! ```text
//! EngineBuilder::new(config, schema)
//!     -> attach_local / attach_cloud
//!     -> build()                       Ready
//!     -> shutdown(grace)               flush, then cancel the rest
//! ```

pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
mod observer;
pub mod producer;
mod reconcile;
pub mod retry;

pub use builder::EngineBuilder;
pub use config::{EngineConfig, RetryConfig};
pub use engine::{ConflictMode, PersistenceEngine, SaveOptions, SaveOutcome, SyncReport};
pub use error::{EngineError, EngineResult};
pub use index::{IndexUpdate, SlotIndex};
pub use producer::{ApplyError, StateProducer};
pub use retry::RetryPolicy;

pub use slotkeep_codec::{Snapshot, Value};
pub use slotkeep_container::{LoadedSnapshot, SaveSchema};
pub use slotkeep_scheduler::{Completion, ShutdownReport, SlotState, TaskHandle, TaskUpdate};
pub use slotkeep_sync::{ConflictRecord, Resolution};
pub use slotkeep_types::{Location, SaveDataInfo, SlotName};
