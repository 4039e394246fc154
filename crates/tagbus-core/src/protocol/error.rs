//! Error type for protocol-level encoding and validation.

use thiserror::Error;

use crate::value::ValueError;

/// Errors raised while building or reading protocol payloads.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Call parameters do not match the method's parameter table exactly.
    #[error("parameter mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    ParameterMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// The code is not in the response table (nor a permitted built-in).
    #[error("invalid response code {0}")]
    InvalidCode(i32),

    /// A response table is inconsistent.
    #[error("invalid response table: {0}")]
    InvalidTable(String),

    #[error(transparent)]
    Value(#[from] ValueError),

    /// The byte slice is shorter than the frame requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The frame version byte is not supported.
    #[error("unsupported reply frame version: {0}")]
    UnsupportedVersion(u8),

    /// The frame or metadata document could not be parsed.
    #[error("malformed payload: {0}")]
    Malformed(String),
}
