//! Error conditions attached to closing endpoints and rejected deliveries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::symbol::{self, Symbol};

/// Error condition carried by `Close`, `End`, `Detach` and `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCondition {
    /// Symbolic condition name
    pub condition: Symbol,
    /// Human readable description, possibly empty
    pub description: String,
}

impl ErrorCondition {
    /// Create a condition with a description.
    pub fn new(condition: impl Into<String>, description: impl Into<String>) -> Self {
        Self { condition: Symbol::new(condition), description: description.into() }
    }

    /// The condition applied to peer-initiated endpoints nobody accepted.
    pub fn not_supported() -> Self {
        Self::new(symbol::NOT_SUPPORTED, "")
    }

    /// The peer sent a transfer without credit.
    pub fn transfer_limit_exceeded() -> Self {
        Self::new(symbol::TRANSFER_LIMIT_EXCEEDED, "transfer received without link credit")
    }

    /// A message body could not be decoded.
    pub fn decode_error(description: impl Into<String>) -> Self {
        Self::new(symbol::DECODE_ERROR, description)
    }

    /// The peer did something its endpoint state forbids.
    pub fn illegal_state(description: impl Into<String>) -> Self {
        Self::new(symbol::ILLEGAL_STATE, description)
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.condition)
        } else {
            write!(f, "{}: {}", self.condition, self.description)
        }
    }
}
