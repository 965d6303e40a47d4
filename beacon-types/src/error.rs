//! Error types for the message codec.

use thiserror::Error;

/// Errors that can occur while decoding an inbound payload.
///
/// A decode error always concerns exactly one message. Callers discard that
/// message and carry on; none of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload ended before a complete JSON value was read.
    #[error("truncated input")]
    TruncatedInput,

    /// The payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    Syntax(String),

    /// The payload is valid JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The `_type` discriminator is absent or not a string.
    #[error("missing message type")]
    MissingType,

    /// The `_type` discriminator names no known variant.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A field required by the variant is missing, or a field has the wrong
    /// type or an out-of-range value.
    #[error("malformed field: {0}")]
    MalformedField(&'static str),
}

impl DecodeError {
    /// Whether a retry with the same bytes could ever succeed.
    ///
    /// Truncation usually means the producer or the transport cut the
    /// payload short; everything else is a property of the bytes themselves.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::TruncatedInput)
    }
}
