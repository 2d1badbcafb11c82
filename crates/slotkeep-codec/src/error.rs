use thiserror::Error;

use crate::registry::TypeTag;

/// Errors produced while decoding bytes into values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before a complete value was read.
    #[error("truncated input: {needed} more bytes needed at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// A value had a different kind than the reader expected.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The payload was written by a newer schema than this build understands.
    #[error("unsupported schema version {found} (newest supported is {supported})")]
    VersionUnsupported { found: u32, supported: u32 },

    /// No decoder is registered for the tag.
    #[error("unknown type tag {0}")]
    UnknownType(TypeTag),

    /// A required field is absent from a record.
    #[error("missing field: {0}")]
    MissingField(String),

    /// Structurally invalid input (bad UTF-8, duplicate field, trailing bytes).
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A checkpoint callback asked the decoder to stop.
    #[error("decoding interrupted")]
    Interrupted,
}

impl DecodeError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Errors produced while encoding values into bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// No encoder is registered for the tag.
    #[error("unknown type tag {0}")]
    UnknownType(TypeTag),

    /// The encoder registered for a tag received a value of another kind.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A length does not fit the u32 length prefix.
    #[error("{what} too large: {len} entries")]
    TooLarge { what: &'static str, len: usize },

    /// A checkpoint callback asked the encoder to stop.
    #[error("encoding interrupted")]
    Interrupted,
}

/// Result alias for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Result alias for encoding.
pub type EncodeResult<T> = Result<T, EncodeError>;
