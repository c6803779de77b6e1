//! Event dispatch.
//!
//! The peer names sessions by its own channel numbers and links by its own
//! `(channel, handle)` pairs. The [`Router`] keeps the mapping to local ids
//! and turns each [`EngineEvent`] into a [`Dispatch`] that names local
//! entities only. Events are resolved one at a time in arrival order, so
//! per-link ordering is whatever the engine delivered.

use std::collections::HashMap;

use bytes::Bytes;
use linkflow_proto::{
    DeliveryTag, EndpointRef, EngineEvent, ErrorCondition, LinkId, Outcome, Properties,
    RemoteEndpoint, RemoteLinkRef, Role, SessionId, Source, Symbol, Target,
};

/// An engine event resolved to local entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Peer opened the connection
    ConnectionOpened {
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
    /// Peer closed the connection
    ConnectionClosed {
        /// Condition the peer attached
        condition: Option<ErrorCondition>,
    },
    /// Transport is gone
    TransportClosed {
        /// Cause, if known
        reason: Option<String>,
    },
    /// Peer began a session
    SessionBegun {
        /// Peer's channel
        channel: SessionId,
        /// Our session, when the peer answers a begin of ours
        answering: Option<SessionId>,
    },
    /// Peer ended a session
    SessionEnded {
        /// Local session
        session: SessionId,
        /// Peer's channel, released by the end
        channel: SessionId,
        /// Condition the peer attached
        condition: Option<ErrorCondition>,
    },
    /// Peer attached a link on a known session
    LinkAttached {
        /// Local session
        session: SessionId,
        /// Peer's numbering for the link
        remote: RemoteLinkRef,
        /// Link name
        name: String,
        /// Role the peer plays
        role: Role,
        /// Peer's source terms
        source: Option<Source>,
        /// Peer's target terms
        target: Option<Target>,
    },
    /// Peer detached a link
    LinkDetached {
        /// Local link
        link: LinkId,
        /// Peer's numbering, released by the detach
        remote: RemoteLinkRef,
        /// Condition the peer attached
        condition: Option<ErrorCondition>,
    },
    /// Peer flow for a link
    Flow {
        /// Local link
        link: LinkId,
        /// Deliveries the peer has seen
        delivery_count: u32,
        /// Further deliveries the peer accepts
        link_credit: u32,
    },
    /// Peer disposition for a delivery
    Disposition {
        /// Local link
        link: LinkId,
        /// Delivery tag
        tag: DeliveryTag,
        /// New state
        state: Option<Outcome>,
        /// Peer settled
        settled: bool,
    },
    /// Peer transfer
    Transfer {
        /// Local link
        link: LinkId,
        /// Delivery tag
        tag: DeliveryTag,
        /// Encoded message
        payload: Bytes,
        /// Peer settled before sending
        settled: bool,
    },
    /// Nothing local matches; the event is dropped
    Unroutable {
        /// Why
        reason: &'static str,
    },
}

/// Peer numbering to local ids.
#[derive(Debug, Default)]
pub struct Router {
    sessions: HashMap<SessionId, SessionId>,
    links: HashMap<RemoteLinkRef, LinkId>,
}

impl Router {
    /// Empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route the peer's `channel` to local session `local`.
    pub fn bind_session(&mut self, channel: SessionId, local: SessionId) {
        self.sessions.insert(channel, local);
    }

    /// Forget the peer's `channel` and every link attached on it.
    pub fn unbind_session(&mut self, channel: SessionId) {
        self.sessions.remove(&channel);
        self.links.retain(|remote, _| remote.channel != channel);
    }

    /// Route the peer's link numbering to local link `local`.
    pub fn bind_link(&mut self, remote: RemoteLinkRef, local: LinkId) {
        self.links.insert(remote, local);
    }

    /// Forget the peer's link numbering.
    pub fn unbind_link(&mut self, remote: RemoteLinkRef) {
        self.links.remove(&remote);
    }

    /// Drop every route to local session `local` and its links.
    pub fn forget_session(&mut self, local: SessionId) {
        let channels: Vec<_> =
            self.sessions.iter().filter(|(_, id)| **id == local).map(|(channel, _)| *channel).collect();
        for channel in channels {
            self.unbind_session(channel);
        }
    }

    /// Drop every route to local link `local`.
    pub fn forget_link(&mut self, local: LinkId) {
        self.links.retain(|_, id| *id != local);
    }

    /// Local session for a peer channel.
    pub fn session(&self, channel: SessionId) -> Option<SessionId> {
        self.sessions.get(&channel).copied()
    }

    /// Local link for a peer link.
    pub fn link(&self, remote: RemoteLinkRef) -> Option<LinkId> {
        self.links.get(&remote).copied()
    }

    fn with_link(&self, remote: RemoteLinkRef, dispatch: impl FnOnce(LinkId) -> Dispatch) -> Dispatch {
        match self.link(remote) {
            Some(link) => dispatch(link),
            None => Dispatch::Unroutable { reason: "no link attached under this handle" },
        }
    }

    /// Resolve an engine event.
    pub fn resolve(&self, event: EngineEvent) -> Dispatch {
        match event {
            EngineEvent::RemoteOpen(RemoteEndpoint::Connection {
                container_id,
                hostname,
                offered_capabilities,
                desired_capabilities,
                properties,
            }) => Dispatch::ConnectionOpened {
                container_id,
                hostname,
                offered_capabilities,
                desired_capabilities,
                properties,
            },
            EngineEvent::RemoteOpen(RemoteEndpoint::Session { channel, remote_channel }) => {
                if self.sessions.contains_key(&channel) {
                    return Dispatch::Unroutable { reason: "channel already in use" };
                }
                Dispatch::SessionBegun { channel, answering: remote_channel }
            },
            EngineEvent::RemoteOpen(RemoteEndpoint::Link { link, name, role, source, target }) => {
                if self.links.contains_key(&link) {
                    return Dispatch::Unroutable { reason: "handle already attached" };
                }
                match self.session(link.channel) {
                    Some(session) => Dispatch::LinkAttached {
                        session,
                        remote: link,
                        name,
                        role,
                        source,
                        target,
                    },
                    None => Dispatch::Unroutable { reason: "attach on unknown channel" },
                }
            },
            EngineEvent::RemoteClose { endpoint: EndpointRef::Connection, condition } => {
                Dispatch::ConnectionClosed { condition }
            },
            EngineEvent::RemoteClose { endpoint: EndpointRef::Session(channel), condition } => {
                match self.session(channel) {
                    Some(session) => Dispatch::SessionEnded { session, channel, condition },
                    None => Dispatch::Unroutable { reason: "end on unknown channel" },
                }
            },
            EngineEvent::RemoteClose { endpoint: EndpointRef::Link(remote), condition } => {
                self.with_link(remote, |link| Dispatch::LinkDetached { link, remote, condition })
            },
            EngineEvent::FlowUpdated { link, delivery_count, link_credit } => {
                self.with_link(link, |link| Dispatch::Flow { link, delivery_count, link_credit })
            },
            EngineEvent::DeliveryUpdated { link, tag, state, settled } => {
                self.with_link(link, |link| Dispatch::Disposition { link, tag, state, settled })
            },
            EngineEvent::DeliveryReceived { link, tag, payload, settled } => {
                self.with_link(link, |link| Dispatch::Transfer { link, tag, payload, settled })
            },
            EngineEvent::TransportClosed { reason } => Dispatch::TransportClosed { reason },
        }
    }
}
