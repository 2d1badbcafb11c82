use slotkeep_codec::{DecodeError, EncodeError};
use thiserror::Error;

use crate::validation::ValidationReport;

/// Errors from sealing, opening, migrating or validating a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Header, length or checksum mismatch. The container is not trusted at all.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// No migration step is registered for `missing_from -> missing_from + 1`.
    #[error("migration gap: no step from v{missing_from} (target v{target})")]
    MigrationGap { missing_from: u32, target: u32 },

    /// A registered migration step returned an error.
    #[error("migration from v{from} failed: {source}")]
    MigrationFailed {
        from: u32,
        #[source]
        source: DecodeError,
    },

    /// One or more validation rules failed without a registered correction.
    #[error("validation failed: {0}")]
    Validation(ValidationReport),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl ContainerError {
    /// Conditions that no retry or fallback within the same copy can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity(_) | Self::MigrationGap { .. })
    }

    /// Returns `true` if a checkpoint callback stopped the work.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Decode(DecodeError::Interrupted) | Self::Encode(EncodeError::Interrupted)
        )
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;
