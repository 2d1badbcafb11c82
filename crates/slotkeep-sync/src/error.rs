use slotkeep_types::{SlotName, TypeError};
use thiserror::Error;

use crate::types::ConflictRecord;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Divergent copies need an explicit decision.
    #[error("conflict on slot {}: {} divergent versions", .0.slot, .0.versions.len())]
    Conflict(Box<ConflictRecord>),

    /// The requested resolution cannot be applied to the copies that exist.
    #[error("cannot resolve {slot}: {reason}")]
    InvalidResolution { slot: SlotName, reason: String },

    /// No conflict is pending for the slot.
    #[error("no pending conflict for slot {0}")]
    NoConflict(SlotName),

    /// An archive name could not be formed (too long, invalid origin).
    #[error("archive name: {0}")]
    ArchiveName(#[from] TypeError),
}

pub type SyncResult<T> = Result<T, SyncError>;
