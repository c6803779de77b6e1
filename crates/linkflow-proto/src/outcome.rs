//! Delivery outcomes.
//!
//! An outcome is the disposition a party attaches to a delivery. Rejected,
//! released and modified are ordinary results of message processing, not
//! failures of the link itself.

use serde::{Deserialize, Serialize};

use crate::{condition::ErrorCondition, symbol};

/// Terminal delivery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Message processed successfully
    Accepted,
    /// Message is invalid and will not be processed
    Rejected {
        /// Why the message was rejected
        error: Option<ErrorCondition>,
    },
    /// Message was not processed and may be redelivered
    Released,
    /// Message was not processed; annotations changed
    Modified {
        /// Count this attempt as a failed delivery
        delivery_failed: bool,
        /// Do not redeliver to this receiver
        undeliverable_here: bool,
    },
}

impl Outcome {
    /// Descriptor symbol of this outcome.
    pub fn descriptor(&self) -> &'static str {
        match self {
            Self::Accepted => symbol::ACCEPTED,
            Self::Rejected { .. } => symbol::REJECTED,
            Self::Released => symbol::RELEASED,
            Self::Modified { .. } => symbol::MODIFIED,
        }
    }

    /// Whether the outcome is `Accepted`.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Descriptors of every outcome, as advertised by a sender's source.
    pub fn all_descriptors() -> [&'static str; 4] {
        [symbol::ACCEPTED, symbol::REJECTED, symbol::RELEASED, symbol::MODIFIED]
    }
}
