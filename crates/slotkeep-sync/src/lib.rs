//! Sync and conflict resolution for Slotkeep.
//!
//! The resolver is pure: it compares the local listing entry of a slot with
//! the complete remote versions and returns an [`Assessment`]. Everything it
//! decides is expressed as a [`ResolutionPlan`], an ordered list of
//! [`SyncAction`]s the engine executes against the backends. No action
//! discards a version: every rejected copy is archived first under
//! `<slot>.conflict-<origin>-<millis>`.
//!
//! Default policy is last-writer-wins by timestamp. Two situations are
//! escalated to an explicit [`Resolution`] instead:
//!
//! - the local copy and the newest remote version are within the ambiguity
//!   window of each other, or
//! - two or more devices uploaded versions newer than the local copy within
//!   the window of each other (no clear causal order).

pub mod error;
pub mod resolver;
pub mod types;

pub use error::{SyncError, SyncResult};
pub use resolver::{ConflictPolicy, ConflictResolver};
pub use types::{
    Assessment, ConflictRecord, DivergentVersion, Resolution, ResolutionPlan, SyncAction,
    VersionSource,
};
