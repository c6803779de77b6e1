//! Events the protocol engine reports to the link engine.
//!
//! The engine decodes peer frames and reports what changed. Entities are
//! named in the peer's numbering; resolving them to local sessions and
//! links is the dispatcher's job.

use bytes::Bytes;

use crate::{
    condition::ErrorCondition,
    ids::{DeliveryTag, LinkId, SessionId},
    outcome::Outcome,
    performative::{Performative, Properties},
    symbol::Symbol,
    terms::{Role, Source, Target},
};

/// A link as numbered by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteLinkRef {
    /// Peer's channel
    pub channel: SessionId,
    /// Peer's handle
    pub handle: LinkId,
}

/// Endpoint the peer opened, with the state it announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEndpoint {
    /// Peer opened the connection
    Connection {
        /// Peer container id
        container_id: String,
        /// Hostname the peer asked for
        hostname: Option<String>,
        /// Capabilities the peer offers
        offered_capabilities: Vec<Symbol>,
        /// Capabilities the peer would like us to have
        desired_capabilities: Vec<Symbol>,
        /// Connection properties the peer sent
        properties: Properties,
    },
    /// Peer began a session
    Session {
        /// Peer's channel
        channel: SessionId,
        /// Our channel, when the peer answers a session we began
        remote_channel: Option<SessionId>,
    },
    /// Peer attached a link
    Link {
        /// Link as numbered by the peer
        link: RemoteLinkRef,
        /// Link name
        name: String,
        /// Role the peer plays
        role: Role,
        /// Peer's source terms
        source: Option<Source>,
        /// Peer's target terms
        target: Option<Target>,
    },
}

/// Endpoint the peer closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRef {
    /// The connection
    Connection,
    /// A session, by peer channel
    Session(SessionId),
    /// A link, by peer numbering
    Link(RemoteLinkRef),
}

/// Engine-level event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Peer opened an endpoint
    RemoteOpen(RemoteEndpoint),

    /// Peer closed an endpoint
    RemoteClose {
        /// Which endpoint
        endpoint: EndpointRef,
        /// Condition the peer attached
        condition: Option<ErrorCondition>,
    },

    /// Peer reported link flow state
    FlowUpdated {
        /// Link as numbered by the peer
        link: RemoteLinkRef,
        /// Deliveries the peer has seen
        delivery_count: u32,
        /// Further deliveries the peer accepts
        link_credit: u32,
    },

    /// Peer changed the state of a delivery
    DeliveryUpdated {
        /// Link as numbered by the peer
        link: RemoteLinkRef,
        /// Delivery tag
        tag: DeliveryTag,
        /// New state
        state: Option<Outcome>,
        /// Peer settled the delivery
        settled: bool,
    },

    /// Peer transferred a delivery
    DeliveryReceived {
        /// Link as numbered by the peer
        link: RemoteLinkRef,
        /// Delivery tag
        tag: DeliveryTag,
        /// Encoded message
        payload: Bytes,
        /// Peer settled before transmission
        settled: bool,
    },

    /// Transport went away
    TransportClosed {
        /// Cause, if known
        reason: Option<String>,
    },
}

impl From<Performative> for EngineEvent {
    fn from(frame: Performative) -> Self {
        match frame {
            Performative::Open {
                container_id,
                hostname,
                offered_capabilities,
                desired_capabilities,
                properties,
            } => Self::RemoteOpen(RemoteEndpoint::Connection {
                container_id,
                hostname,
                offered_capabilities,
                desired_capabilities,
                properties,
            }),
            Performative::Begin { channel, remote_channel } => {
                Self::RemoteOpen(RemoteEndpoint::Session { channel, remote_channel })
            },
            Performative::Attach { channel, handle, name, role, source, target } => {
                Self::RemoteOpen(RemoteEndpoint::Link {
                    link: RemoteLinkRef { channel, handle },
                    name,
                    role,
                    source,
                    target,
                })
            },
            Performative::Flow { channel, handle, delivery_count, link_credit } => {
                Self::FlowUpdated {
                    link: RemoteLinkRef { channel, handle },
                    delivery_count,
                    link_credit,
                }
            },
            Performative::Transfer { channel, handle, tag, payload, settled } => {
                Self::DeliveryReceived {
                    link: RemoteLinkRef { channel, handle },
                    tag,
                    payload,
                    settled,
                }
            },
            Performative::Disposition { channel, handle, tag, state, settled, .. } => {
                Self::DeliveryUpdated { link: RemoteLinkRef { channel, handle }, tag, state, settled }
            },
            Performative::Detach { channel, handle, error } => Self::RemoteClose {
                endpoint: EndpointRef::Link(RemoteLinkRef { channel, handle }),
                condition: error,
            },
            Performative::End { channel, error } => {
                Self::RemoteClose { endpoint: EndpointRef::Session(channel), condition: error }
            },
            Performative::Close { error } => {
                Self::RemoteClose { endpoint: EndpointRef::Connection, condition: error }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_numbering_is_preserved() {
        let frame = Performative::Flow {
            channel: SessionId(3),
            handle: LinkId(7),
            delivery_count: 10,
            link_credit: 5,
        };

        let event = EngineEvent::from(frame);
        assert_eq!(
            event,
            EngineEvent::FlowUpdated {
                link: RemoteLinkRef { channel: SessionId(3), handle: LinkId(7) },
                delivery_count: 10,
                link_credit: 5,
            }
        );
    }

    #[test]
    fn detach_becomes_link_close() {
        let frame = Performative::Detach {
            channel: SessionId(0),
            handle: LinkId(1),
            error: Some(ErrorCondition::not_supported()),
        };

        match EngineEvent::from(frame) {
            EngineEvent::RemoteClose { endpoint: EndpointRef::Link(link), condition } => {
                assert_eq!(link.handle, LinkId(1));
                assert_eq!(condition, Some(ErrorCondition::not_supported()));
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn open_carries_capabilities_and_properties() {
        let properties = Properties::from([(Symbol::new("product"), "broker".to_owned())]);
        let frame = Performative::Open {
            container_id: "peer".into(),
            hostname: Some("vhost".into()),
            offered_capabilities: vec![Symbol::anonymous_relay()],
            desired_capabilities: vec![Symbol::new("shared-subs")],
            properties: properties.clone(),
        };

        assert_eq!(
            EngineEvent::from(frame),
            EngineEvent::RemoteOpen(RemoteEndpoint::Connection {
                container_id: "peer".into(),
                hostname: Some("vhost".into()),
                offered_capabilities: vec![Symbol::anonymous_relay()],
                desired_capabilities: vec![Symbol::new("shared-subs")],
                properties,
            })
        );
    }
}
