//! Symbolic constants.
//!
//! AMQP uses symbols for capabilities, outcome descriptors and error
//! conditions. They are compared by exact string value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Capability a peer offers when it relays messages sent on a link whose
/// target has no address.
pub const ANONYMOUS_RELAY: &str = "ANONYMOUS-RELAY";

/// Condition used when an unhandled peer-initiated endpoint is refused.
pub const NOT_SUPPORTED: &str = "Not Supported";

/// Condition used when a peer transfers more deliveries than it was granted.
pub const TRANSFER_LIMIT_EXCEEDED: &str = "amqp:link:transfer-limit-exceeded";

/// Condition used when a message body cannot be decoded.
pub const DECODE_ERROR: &str = "amqp:decode-error";

/// Condition used when the peer breaks the link protocol.
pub const ILLEGAL_STATE: &str = "amqp:illegal-state";

/// Outcome descriptor for [`crate::Outcome::Accepted`].
pub const ACCEPTED: &str = "amqp:accepted:list";
/// Outcome descriptor for [`crate::Outcome::Rejected`].
pub const REJECTED: &str = "amqp:rejected:list";
/// Outcome descriptor for [`crate::Outcome::Released`].
pub const RELEASED: &str = "amqp:released:list";
/// Outcome descriptor for [`crate::Outcome::Modified`].
pub const MODIFIED: &str = "amqp:modified:list";

/// An AMQP symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from any string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The anonymous-relay capability symbol.
    pub fn anonymous_relay() -> Self {
        Self::new(ANONYMOUS_RELAY)
    }

    /// Symbol text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
