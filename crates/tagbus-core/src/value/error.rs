//! Error type shared by every part of the value model.

use thiserror::Error;

/// Errors raised while typing, converting, encoding, decoding or resolving
/// values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    /// A native value has no corresponding [`crate::DataType`].
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A value does not conform to the declared type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A model item required by the strict partial-value policy is absent.
    #[error("missing model item {0:?}")]
    MissingField(String),

    /// A name that is not an item of the model was supplied.
    #[error("unknown model item {0:?}")]
    UnknownField(String),

    /// A model reference was used where an embedded schema is required.
    #[error("model {0} has not been resolved")]
    UnresolvedModel(String),

    /// The model could not be found in the cache, directory or store.
    #[error("model {reference} not found: {reason}")]
    ModelNotFound { reference: String, reason: String },

    /// A `path@version` string could not be parsed.
    #[error("malformed model reference {0:?}")]
    MalformedModelRef(String),

    /// Model nesting exceeded the supported depth (usually a cycle).
    #[error("model {reference} nests deeper than {limit} levels")]
    ModelTooDeep { reference: String, limit: usize },

    /// A model definition is inconsistent.
    #[error("invalid model {path}: {reason}")]
    InvalidModel { path: String, reason: String },

    /// The byte slice ended before the value was complete.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The encoding version byte is not supported.
    #[error("unsupported value encoding version: {0}")]
    UnsupportedVersion(u8),

    /// The encoded bytes are structurally invalid.
    #[error("malformed value: {0}")]
    Malformed(String),
}
