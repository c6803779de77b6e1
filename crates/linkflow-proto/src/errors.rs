//! Error types for message and frame encoding.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// CBOR serialization failed
    #[error("failed to encode {what}: {reason}")]
    Encode {
        /// What was being encoded
        what: &'static str,
        /// Underlying serializer message
        reason: String,
    },

    /// CBOR deserialization failed
    #[error("failed to decode {what}: {reason}")]
    Decode {
        /// What was being decoded
        what: &'static str,
        /// Underlying deserializer message
        reason: String,
    },

    /// Frame length prefix exceeds the configured maximum
    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared frame size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },
}
