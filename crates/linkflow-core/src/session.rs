//! Sessions.
//!
//! A session owns its links. Ending a session, from either side, ends every
//! link on it; there are no per-link detach frames in that case.

use std::collections::BTreeMap;

use linkflow_proto::{ErrorCondition, LinkId, Performative, Role, SessionId};
use tracing::debug;

use crate::{
    endpoint::{Endpoint, EndpointState},
    error::CoreError,
    event::{Abort, ConnectionAction, ConnectionEvent},
    link::Link,
};

type Actions = Vec<ConnectionAction>;

/// One session and its links.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    endpoint: Endpoint,
    remote_channel: Option<SessionId>,
    links: BTreeMap<LinkId, Link>,
}

impl Session {
    pub(crate) fn new(id: SessionId) -> Self {
        Self { id, endpoint: Endpoint::new(), remote_channel: None, links: BTreeMap::new() }
    }

    /// Local channel.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> EndpointState {
        self.endpoint.state()
    }

    /// Peer's channel, once it began its end.
    pub fn remote_channel(&self) -> Option<SessionId> {
        self.remote_channel
    }

    /// Links on this session. Closed links are dropped by the connection.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Look up a link.
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(&id)
    }

    pub(crate) fn locally_opened(&self) -> bool {
        self.endpoint.locally_opened()
    }

    pub(crate) fn insert_link(&mut self, link: Link) {
        self.links.insert(link.id(), link);
    }

    /// Remove links that reached `Closed`, returning their ids.
    pub(crate) fn reap_closed_links(&mut self) -> Vec<LinkId> {
        let closed: Vec<_> =
            self.links.values().filter(|link| link.state().is_closed()).map(Link::id).collect();
        for id in &closed {
            self.links.remove(id);
        }
        closed
    }

    /// Our link named `name` in role `role` still waiting for the peer.
    pub(crate) fn find_unattached(&self, name: &str, role: Role) -> Option<LinkId> {
        self.links
            .values()
            .find(|link| {
                link.name() == name
                    && link.role() == role
                    && link.remote().is_none()
                    && !link.state().is_closing()
            })
            .map(Link::id)
    }

    fn begin_frame(&self) -> ConnectionAction {
        ConnectionAction::SendFrame(Performative::Begin {
            channel: self.id,
            remote_channel: self.remote_channel,
        })
    }

    /// Begin the session.
    ///
    /// # Errors
    ///
    /// `IllegalState` unless unopened or only remotely opened.
    pub(crate) fn open(&mut self) -> Result<Actions, CoreError> {
        let state = self.endpoint.open_local("begin session")?;
        debug!(session = %self.id, ?state, "session opened locally");
        Ok(vec![self.begin_frame()])
    }

    /// End the session and every link on it.
    ///
    /// # Errors
    ///
    /// `IllegalState` if already ended locally.
    pub(crate) fn close(&mut self, condition: Option<ErrorCondition>) -> Result<Actions, CoreError> {
        let announced = self.endpoint.ever_locally_opened();
        let state = self.endpoint.close_local("end session")?;
        debug!(session = %self.id, ?state, "session closed locally");

        let mut actions = Vec::new();
        if announced || self.remote_channel.is_some() {
            if !announced {
                actions.push(self.begin_frame());
            }
            actions.push(ConnectionAction::SendFrame(Performative::End {
                channel: self.id,
                error: condition,
            }));
        }
        for link in self.links.values_mut() {
            actions.extend(link.teardown(Abort::LinkClosed));
        }
        Ok(actions)
    }

    /// The peer began its end.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the peer already began.
    pub(crate) fn on_remote_open(&mut self, channel: SessionId) -> Result<EndpointState, CoreError> {
        let state = self.endpoint.open_remote()?;
        self.remote_channel = Some(channel);
        debug!(session = %self.id, remote_channel = %channel, ?state, "session opened remotely");
        Ok(state)
    }

    /// The peer ended the session.
    pub(crate) fn on_remote_close(&mut self, condition: Option<ErrorCondition>) -> Actions {
        if self.endpoint.state().is_closed() {
            return Vec::new();
        }
        let state = self.endpoint.close_remote();
        debug!(session = %self.id, ?state, ?condition, "session closed remotely");
        if state.is_closed() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for link in self.links.values_mut() {
            if link.state().is_closed() {
                continue;
            }
            actions.extend(link.teardown(Abort::LinkClosed));
            actions.push(ConnectionAction::Notify(ConnectionEvent::LinkClosed {
                link: link.id(),
                condition: None,
            }));
        }
        actions.push(ConnectionAction::Notify(ConnectionEvent::SessionClosed {
            session: self.id,
            condition,
        }));
        actions
    }

    /// Force the session and its links closed without frames.
    pub(crate) fn teardown(&mut self, reason: Abort) -> Actions {
        self.endpoint.force_closed();
        self.links.values_mut().flat_map(|link| link.teardown(reason)).collect()
    }
}
