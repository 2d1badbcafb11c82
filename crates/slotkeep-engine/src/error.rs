use slotkeep_container::ContainerError;
use slotkeep_scheduler::SchedulerError;
use slotkeep_store::StorageError;
use slotkeep_sync::SyncError;
use slotkeep_types::{Location, TypeError};
use thiserror::Error;

/// Every failure a Slotkeep task can complete with.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container: {0}")]
    Container(ContainerError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("sync: {0}")]
    Sync(#[from] SyncError),

    #[error("invalid identifier: {0}")]
    Type(#[from] TypeError),

    /// The operation needs a backend the engine was built without.
    #[error("no {0} backend attached")]
    NotAttached(Location),

    #[error("configuration: {0}")]
    Config(String),

    /// The producer rejected a loaded snapshot.
    #[error("producer rejected snapshot: {0}")]
    Producer(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// Conditions that need user-facing recovery rather than a retry:
    /// migration gaps and integrity failures on the last copy tried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Container(e) => e.is_fatal(),
            Self::Storage(StorageError::Integrity(_)) => true,
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_transient())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Timeout(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::NotFound(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Storage(StorageError::Cancelled))
    }

    /// The escalated conflict, if this error carries one.
    pub fn conflict(&self) -> Option<&slotkeep_sync::ConflictRecord> {
        match self {
            Self::Sync(SyncError::Conflict(record)) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Container(ContainerError::Integrity(_)) | Self::Storage(StorageError::Integrity(_))
        )
    }
}

impl From<ContainerError> for EngineError {
    fn from(err: ContainerError) -> Self {
        if err.is_interrupted() {
            Self::Cancelled
        } else {
            Self::Container(err)
        }
    }
}

impl From<SchedulerError> for EngineError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Cancelled => Self::Cancelled,
            SchedulerError::ShuttingDown => Self::ShuttingDown,
            SchedulerError::Panicked(msg) => Self::Panicked(msg),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use slotkeep_codec::{DecodeError, EncodeError};

    use super::*;

    #[test]
    fn fatal_classification() {
        let gap = EngineError::from(ContainerError::MigrationGap {
            missing_from: 1,
            target: 3,
        });
        assert!(gap.is_fatal());
        assert!(EngineError::from(ContainerError::Integrity("bad magic".into())).is_fatal());
        assert!(EngineError::from(StorageError::Integrity("no trailer".into())).is_fatal());
        assert!(!EngineError::from(StorageError::Offline).is_fatal());
        assert!(!EngineError::from(ContainerError::Decode(DecodeError::MissingField("hp".into()))).is_fatal());
    }

    #[test]
    fn interrupted_codec_work_is_cancellation() {
        let err = EngineError::from(ContainerError::Encode(EncodeError::Interrupted));
        assert!(matches!(err, EngineError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn transient_and_timeout() {
        let err = EngineError::from(StorageError::Timeout(Duration::from_millis(5000)));
        assert!(err.is_transient());
        assert!(err.is_timeout());
        assert!(!EngineError::from(StorageError::NotFound("s".into())).is_transient());
    }

    #[test]
    fn scheduler_errors_map_one_to_one() {
        assert!(matches!(EngineError::from(SchedulerError::Cancelled), EngineError::Cancelled));
        assert!(matches!(EngineError::from(SchedulerError::ShuttingDown), EngineError::ShuttingDown));
        assert!(matches!(
            EngineError::from(SchedulerError::Panicked("x".into())),
            EngineError::Panicked(m) if m == "x"
        ));
    }
}
