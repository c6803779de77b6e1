//! Link addressing terms.

use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;

/// Which end of a link a party plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Transmits deliveries
    Sender,
    /// Accepts deliveries
    Receiver,
}

impl Role {
    /// The role the peer plays on the same link.
    pub fn opposite(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

/// Where messages on a link come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Node address, if any
    pub address: Option<String>,
    /// Outcome descriptors the sender supports
    pub outcomes: Vec<Symbol>,
}

impl Source {
    /// Source for the given address with no outcome list.
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: Some(address.into()), outcomes: Vec::new() }
    }
}

/// Where messages on a link go.
///
/// A target with no address asks the peer to route every message by its own
/// address field (anonymous relay).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Node address, if any
    pub address: Option<String>,
}

impl Target {
    /// Target for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: Some(address.into()) }
    }

    /// Target without address, resolved per message by a relaying peer.
    pub fn anonymous() -> Self {
        Self { address: None }
    }
}
