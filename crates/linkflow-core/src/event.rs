//! Actions and application events produced by the engine.
//!
//! The engine never performs I/O. Every effect is queued as a
//! [`ConnectionAction`]; the driver executes frame and transport actions and
//! hands [`ConnectionEvent`]s to the application.

use linkflow_proto::{DeliveryId, ErrorCondition, LinkId, Message, Outcome, Performative, SessionId};

/// Effect the driver must carry out.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Hand this frame to the protocol engine
    SendFrame(Performative),

    /// Request a transmission pass for queued frames
    Flush,

    /// Tear down the transport
    Disconnect,

    /// Report this event to the application
    Notify(ConnectionEvent),
}

impl ConnectionAction {
    /// The frame, if this is a `SendFrame`.
    pub fn frame(&self) -> Option<&Performative> {
        match self {
            Self::SendFrame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Application-facing name of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryHandle {
    /// Link carrying the delivery
    pub link: LinkId,
    /// Delivery within that link
    pub delivery: DeliveryId,
}

/// Why a delivery was abandoned before settlement completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    /// Its link was closed
    LinkClosed,
    /// Its connection was closed or lost
    ConnectionClosed,
}

/// Change reported for a tracked delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryUpdate {
    /// Peer reported a new disposition
    Disposition {
        /// Outcome the peer attached, if any
        state: Option<Outcome>,
        /// Peer settled the delivery
        remotely_settled: bool,
        /// Delivery is settled on our side too and no longer tracked
        locally_settled: bool,
    },

    /// Terminal: the delivery will never complete
    Aborted(Abort),
}

/// Single-use permission to settle one inbound delivery.
///
/// Handed out with a [`ConnectionEvent::Message`] when the application is
/// responsible for settlement. It is consumed by
/// [`crate::Connection::settle`] and stops working once its link closes.
#[derive(Debug, PartialEq, Eq)]
pub struct SettleToken {
    handle: DeliveryHandle,
}

impl SettleToken {
    pub(crate) fn new(handle: DeliveryHandle) -> Self {
        Self { handle }
    }

    /// Delivery this token settles.
    pub fn handle(&self) -> DeliveryHandle {
        self.handle
    }
}

/// Something the application should know about.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Peer opened the connection
    Opened {
        /// Peer container id
        remote_container: String,
        /// Peer offered the anonymous-relay capability
        anonymous_relay: bool,
    },

    /// Peer closed the connection
    Closed {
        /// Condition the peer attached
        condition: Option<ErrorCondition>,
    },

    /// Transport is gone. Reported exactly once per connection.
    Disconnected,

    /// Peer began a session we did not start
    SessionOpened(SessionId),

    /// Peer ended a session
    SessionClosed {
        /// Session
        session: SessionId,
        /// Condition the peer attached
        condition: Option<ErrorCondition>,
    },

    /// Peer attached a receiving link; we are its sender
    SenderOpened(LinkId),

    /// Peer attached a sending link; we are its receiver
    ReceiverOpened(LinkId),

    /// Both ends of a link are attached
    LinkActive(LinkId),

    /// Link was detached by the peer or after a peer violation
    LinkClosed {
        /// Link
        link: LinkId,
        /// Condition attached to the detach
        condition: Option<ErrorCondition>,
    },

    /// Inbound message
    Message {
        /// Delivery carrying the message
        delivery: DeliveryHandle,
        /// Decoded message
        message: Message,
        /// Present when the application must settle
        settle: Option<SettleToken>,
    },

    /// Tracked delivery changed
    DeliveryUpdated {
        /// Delivery
        delivery: DeliveryHandle,
        /// What changed
        update: DeliveryUpdate,
    },

    /// Sender regained credit after being exhausted
    SendQueueDrained(LinkId),
}
