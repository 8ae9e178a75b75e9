//! Error types for the queue image codec and identifier parsing.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The image does not start with the expected magic bytes.
    #[error("invalid magic bytes: {0:02x?}")]
    InvalidMagic([u8; 4]),

    /// The image was written by an unknown format version.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// The image is shorter than its header claims.
    #[error("truncated image: expected {expected} bytes, found {actual}")]
    Truncated {
        /// Number of bytes the header announced.
        expected: usize,
        /// Number of bytes actually present.
        actual: usize,
    },

    /// The body checksum does not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// CBOR encoding failed.
    #[error("CBOR encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("CBOR decode error: {0}")]
    Decode(String),

    /// A textual value could not be parsed.
    #[error("invalid {what}: {value}")]
    InvalidValue {
        /// What was being parsed.
        what: &'static str,
        /// The offending input.
        value: String,
    },
}

impl CodecError {
    /// Creates an invalid-value error.
    pub fn invalid_value(what: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            what,
            value: value.into(),
        }
    }
}
