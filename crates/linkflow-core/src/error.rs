//! Error types for the link engine.

use linkflow_proto::{DeliveryId, DeliveryTag, LinkId, ProtocolError, Role, SessionId};
use thiserror::Error;

use crate::endpoint::EndpointState;

/// Errors reported synchronously to the caller of a core operation.
///
/// Peer-side faults never appear here: they are surfaced as connection
/// events. Rejected, released or modified deliveries are outcomes, not
/// errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Operation not valid in the endpoint's current lifecycle state
    #[error("cannot {operation} in state {state:?}")]
    IllegalState {
        /// Current state
        state: EndpointState,
        /// Operation attempted
        operation: &'static str,
    },

    /// Not enough credit to transmit
    #[error("insufficient credit: requested {requested}, available {available}")]
    InsufficientCredit {
        /// Deliveries requested
        requested: u32,
        /// Deliveries currently allowed
        available: u32,
    },

    /// Tag already used by an unsettled delivery on the same link
    #[error("delivery tag {0} is already outstanding on this link")]
    DuplicateTag(DeliveryTag),

    /// Link was closed
    #[error("{0} is closed")]
    LinkClosed(LinkId),

    /// Connection was closed or disconnected
    #[error("connection is closed")]
    ConnectionClosed,

    /// No such session on this connection
    #[error("unknown {0}")]
    UnknownSession(SessionId),

    /// No such link on this connection
    #[error("unknown {0}")]
    UnknownLink(LinkId),

    /// No unsettled delivery with this id
    #[error("unknown {0}")]
    UnknownDelivery(DeliveryId),

    /// Every channel or handle number is held by a live endpoint
    #[error("no free {0} number left on this connection")]
    IdsExhausted(&'static str),

    /// Operation only valid for the other link direction
    #[error("{link} is not a {expected:?}")]
    WrongRole {
        /// Link the operation targeted
        link: LinkId,
        /// Role the operation requires
        expected: Role,
    },

    /// Message could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
