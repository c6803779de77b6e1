//! Logical frames.
//!
//! Each variant corresponds to one AMQP performative, reduced to the fields
//! the link engine reads or writes. Identifiers are always in the numbering
//! of the party that sends the frame.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    condition::ErrorCondition,
    ids::{DeliveryTag, LinkId, SessionId},
    outcome::Outcome,
    symbol::Symbol,
    terms::{Role, Source, Target},
};

/// Connection properties: symbolic keys with string values.
pub type Properties = BTreeMap<Symbol, String>;

/// A logical AMQP frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Performative {
    /// Open the connection
    Open {
        /// Container id of the sender
        container_id: String,
        /// Virtual host the sender wants to reach
        hostname: Option<String>,
        /// Capabilities the sender supports
        offered_capabilities: Vec<Symbol>,
        /// Capabilities the sender would like the peer to support
        desired_capabilities: Vec<Symbol>,
        /// Free-form connection properties
        properties: Properties,
    },

    /// Begin a session
    Begin {
        /// Sender's channel
        channel: SessionId,
        /// Peer's channel when answering a peer-initiated begin
        remote_channel: Option<SessionId>,
    },

    /// Attach a link
    Attach {
        /// Sender's channel
        channel: SessionId,
        /// Sender's handle for the link
        handle: LinkId,
        /// Link name, shared by both ends
        name: String,
        /// Role the sender of this frame plays
        role: Role,
        /// Source terms
        source: Option<Source>,
        /// Target terms
        target: Option<Target>,
    },

    /// Update link flow state
    Flow {
        /// Sender's channel
        channel: SessionId,
        /// Sender's handle for the link
        handle: LinkId,
        /// Deliveries the receiving end has seen so far
        delivery_count: u32,
        /// Further deliveries the receiving end will accept
        link_credit: u32,
    },

    /// Transfer one delivery
    Transfer {
        /// Sender's channel
        channel: SessionId,
        /// Sender's handle for the link
        handle: LinkId,
        /// Delivery tag
        tag: DeliveryTag,
        /// Encoded message
        payload: Bytes,
        /// Sender settled before transmission
        settled: bool,
    },

    /// Update the state of one delivery
    Disposition {
        /// Sender's channel
        channel: SessionId,
        /// Sender's handle for the link carrying the delivery
        handle: LinkId,
        /// Role of the frame sender on that link
        role: Role,
        /// Delivery tag
        tag: DeliveryTag,
        /// New delivery state, if any
        state: Option<Outcome>,
        /// Frame sender considers the delivery settled
        settled: bool,
    },

    /// Detach (close) a link
    Detach {
        /// Sender's channel
        channel: SessionId,
        /// Sender's handle for the link
        handle: LinkId,
        /// Why the link was closed
        error: Option<ErrorCondition>,
    },

    /// End a session
    End {
        /// Sender's channel
        channel: SessionId,
        /// Why the session was ended
        error: Option<ErrorCondition>,
    },

    /// Close the connection
    Close {
        /// Why the connection was closed
        error: Option<ErrorCondition>,
    },
}

impl Performative {
    /// Frame name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Begin { .. } => "begin",
            Self::Attach { .. } => "attach",
            Self::Flow { .. } => "flow",
            Self::Transfer { .. } => "transfer",
            Self::Disposition { .. } => "disposition",
            Self::Detach { .. } => "detach",
            Self::End { .. } => "end",
            Self::Close { .. } => "close",
        }
    }
}
