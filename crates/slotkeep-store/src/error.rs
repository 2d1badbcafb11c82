use std::io;
use std::time::Duration;

/// Errors from storage backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The slot or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The remote store refused the write for lack of space.
    #[error("quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    /// The operation did not finish within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The remote store is unreachable.
    #[error("backend offline")]
    Offline,

    /// The transfer observer asked the operation to stop.
    #[error("operation cancelled")]
    Cancelled,

    /// Stored bytes failed an integrity check.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Sidecar or listing metadata could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Conditions worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Offline)
    }

    /// Map an I/O error, naming `what` for the kinds that have their own variant.
    pub fn from_io(err: io::Error, what: impl Into<String>) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(what.into()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(what.into()),
            _ => Self::Io(err),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(StorageError::Offline.is_transient());
        assert!(!StorageError::NotFound("x".into()).is_transient());
        assert!(!StorageError::Cancelled.is_transient());
    }

    #[test]
    fn io_kinds_map_to_variants() {
        let err = StorageError::from_io(io::Error::from(io::ErrorKind::NotFound), "Profile1");
        assert!(matches!(err, StorageError::NotFound(ref s) if s == "Profile1"));
        let err = StorageError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "Profile1");
        assert!(matches!(err, StorageError::PermissionDenied(_)));
        let err = StorageError::from_io(io::Error::from(io::ErrorKind::Other), "Profile1");
        assert!(matches!(err, StorageError::Io(_)));
    }
}
