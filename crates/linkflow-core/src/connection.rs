//! Connection supervisor.
//!
//! A [`Connection`] owns every session and link of one AMQP connection and
//! is the application's only handle on them.
//!
//! # Architecture: Action Queue
//!
//! - Application calls mutate local state and return synchronously.
//! - Peer events are fed in through [`Connection::handle_event`].
//! - Every effect is queued as a [`ConnectionAction`]; the driver pops them
//!   with [`Connection::poll_action`] and executes them in order.
//!
//! The connection is never shared. A driver moves it into one task and
//! serializes application calls and engine events on that task.
//!
//! # Peer-initiated endpoints
//!
//! Sessions and links the peer opens without us asking go through the
//! configured [`OpenPolicy`]. `Reject` answers with an open immediately
//! followed by a close carrying `"Not Supported"`. `Notify` reports the
//! endpoint and leaves opening or closing it to the application.
//!
//! # Releasing endpoints
//!
//! A session or link closed on both sides is dropped after the call or peer
//! event that closed it, and its channel or handle may be handed out again.
//! Endpoints torn down by a transport loss are kept for inspection.
//!
//! # Disconnect
//!
//! Losing the transport, locally via [`Connection::disconnect`] or remotely
//! via [`EngineEvent::TransportClosed`], closes every session and link,
//! aborts every unsettled delivery with [`Abort::ConnectionClosed`] and
//! reports [`ConnectionEvent::Disconnected`] exactly once. Every later call
//! fails with [`CoreError::ConnectionClosed`].

use std::collections::{BTreeMap, HashMap, VecDeque};

use linkflow_proto::{
    EngineEvent, ErrorCondition, LinkId, Message, Outcome, Performative, Properties,
    RemoteLinkRef, Role, SessionId, Source, Symbol, Target, symbol,
};
use tracing::{debug, trace, warn};

use crate::{
    config::{ConnectionConfig, OpenPolicy, ReceiveMode, SendOptions},
    dispatcher::{Dispatch, Router},
    endpoint::{Endpoint, EndpointState},
    env::Environment,
    error::CoreError,
    event::{Abort, ConnectionAction, ConnectionEvent, DeliveryHandle, SettleToken},
    link::Link,
    session::Session,
};

type Actions = Vec<ConnectionAction>;

/// One AMQP connection with its sessions and links.
#[derive(Debug)]
pub struct Connection<E: Environment> {
    env: E,
    config: ConnectionConfig,
    container_id: String,
    endpoint: Endpoint,
    remote_container: Option<String>,
    remote_hostname: Option<String>,
    remote_capabilities: Vec<Symbol>,
    remote_desired_capabilities: Vec<Symbol>,
    remote_properties: Properties,
    remote_condition: Option<ErrorCondition>,
    condition: Option<ErrorCondition>,
    anonymous_relay: bool,
    sessions: BTreeMap<SessionId, Session>,
    link_sessions: HashMap<LinkId, SessionId>,
    router: Router,
    next_session: u16,
    next_link: u32,
    default_session: Option<SessionId>,
    default_sender: Option<LinkId>,
    disconnected: bool,
    actions: VecDeque<ConnectionAction>,
}

impl<E: Environment> Connection<E> {
    /// Create an unopened connection.
    pub fn new(env: E, config: ConnectionConfig) -> Self {
        let container_id = match &config.container_id {
            Some(id) => id.clone(),
            None => format!("linkflow-{:016x}", env.random_u64()),
        };

        Self {
            env,
            config,
            container_id,
            endpoint: Endpoint::new(),
            remote_container: None,
            remote_hostname: None,
            remote_capabilities: Vec::new(),
            remote_desired_capabilities: Vec::new(),
            remote_properties: Properties::new(),
            remote_condition: None,
            condition: None,
            anonymous_relay: false,
            sessions: BTreeMap::new(),
            link_sessions: HashMap::new(),
            router: Router::new(),
            next_session: 0,
            next_link: 0,
            default_session: None,
            default_sender: None,
            disconnected: false,
            actions: VecDeque::new(),
        }
    }

    /// Our container id.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Replace the container id before the connection is opened.
    ///
    /// # Errors
    ///
    /// `IllegalState` once opened.
    pub fn set_container_id(&mut self, container_id: impl Into<String>) -> Result<(), CoreError> {
        if self.endpoint.ever_locally_opened() {
            return Err(CoreError::IllegalState {
                state: self.endpoint.state(),
                operation: "set container id",
            });
        }
        self.container_id = container_id.into();
        Ok(())
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Policy for peer-initiated sessions.
    pub fn set_session_open_policy(&mut self, policy: OpenPolicy) {
        self.config.session_open_policy = policy;
    }

    /// Policy for peer-attached receiving links, for which we are the sender.
    pub fn set_sender_open_policy(&mut self, policy: OpenPolicy) {
        self.config.sender_open_policy = policy;
    }

    /// Policy for peer-attached sending links, for which we are the receiver.
    pub fn set_receiver_open_policy(&mut self, policy: OpenPolicy) {
        self.config.receiver_open_policy = policy;
    }

    /// Connection lifecycle state.
    pub fn state(&self) -> EndpointState {
        self.endpoint.state()
    }

    /// Peer container id, once the peer opened.
    pub fn remote_container(&self) -> Option<&str> {
        self.remote_container.as_deref()
    }

    /// Hostname the peer asked for.
    pub fn remote_hostname(&self) -> Option<&str> {
        self.remote_hostname.as_deref()
    }

    /// Capabilities the peer offered.
    pub fn remote_offered_capabilities(&self) -> &[Symbol] {
        &self.remote_capabilities
    }

    /// Capabilities the peer asked us for.
    pub fn remote_desired_capabilities(&self) -> &[Symbol] {
        &self.remote_desired_capabilities
    }

    /// Properties from the peer's open.
    pub fn remote_properties(&self) -> &Properties {
        &self.remote_properties
    }

    /// Condition the peer closed the connection with.
    pub fn remote_condition(&self) -> Option<&ErrorCondition> {
        self.remote_condition.as_ref()
    }

    /// Condition our close carries.
    pub fn condition(&self) -> Option<&ErrorCondition> {
        self.condition.as_ref()
    }

    /// Set the condition a later [`Self::close`] sends when it is given none.
    pub fn set_condition(&mut self, condition: Option<ErrorCondition>) {
        self.condition = condition;
    }

    /// Whether the peer offered `ANONYMOUS-RELAY` when it opened.
    ///
    /// Always false before the peer's open arrives.
    pub fn is_anonymous_relay_supported(&self) -> bool {
        self.anonymous_relay
    }

    /// Whether the transport is gone.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Next queued action.
    pub fn poll_action(&mut self) -> Option<ConnectionAction> {
        self.actions.pop_front()
    }

    /// All queued actions, in order.
    pub fn take_actions(&mut self) -> Vec<ConnectionAction> {
        self.actions.drain(..).collect()
    }

    /// Whether actions are waiting.
    pub fn has_pending_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    fn emit(&mut self, actions: Actions) {
        let wrote = actions.iter().any(|action| action.frame().is_some());
        for action in &actions {
            if let Some(frame) = action.frame() {
                trace!(frame = frame.name(), "queued frame");
            }
        }
        self.actions.extend(actions);
        if wrote {
            self.actions.push_back(ConnectionAction::Flush);
        }
    }

    fn notify(&mut self, event: ConnectionEvent) {
        self.actions.push_back(ConnectionAction::Notify(event));
    }

    fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.disconnected {
            return Err(CoreError::ConnectionClosed);
        }
        Ok(())
    }

    /// Send our open.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `IllegalState` if already opened
    pub fn open(&mut self) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let state = self.endpoint.open_local("open connection")?;
        debug!(container_id = %self.container_id, ?state, "connection opened locally");

        let open = self.open_frame();
        self.emit(vec![open]);
        Ok(())
    }

    fn open_frame(&self) -> ConnectionAction {
        ConnectionAction::SendFrame(Performative::Open {
            container_id: self.container_id.clone(),
            hostname: self.config.hostname.clone(),
            offered_capabilities: self.config.offered_capabilities.clone(),
            desired_capabilities: self.config.desired_capabilities.clone(),
            properties: self.config.properties.clone(),
        })
    }

    /// Send our close. Every session and link ends with it.
    ///
    /// Without an explicit `condition` the one from [`Self::set_condition`]
    /// is sent.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `IllegalState` if already closed
    pub fn close(&mut self, condition: Option<ErrorCondition>) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let announced = self.endpoint.ever_locally_opened();
        let state = self.endpoint.close_local("close connection")?;
        let condition = condition.or_else(|| self.condition.clone());
        self.condition.clone_from(&condition);
        debug!(?state, ?condition, "connection closed locally");

        let mut actions = Vec::new();
        if announced || self.remote_container.is_some() {
            if !announced {
                actions.push(self.open_frame());
            }
            actions.push(ConnectionAction::SendFrame(Performative::Close { error: condition }));
        }
        actions.extend(self.teardown_sessions());
        self.emit(actions);
        self.reap();
        Ok(())
    }

    /// Drop the transport. Idempotent.
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        debug!(container_id = %self.container_id, "disconnecting");
        self.actions.push_back(ConnectionAction::Disconnect);
        self.lose_transport();
    }

    fn lose_transport(&mut self) {
        self.disconnected = true;
        self.endpoint.force_closed();
        let actions = self.teardown_sessions();
        self.emit(actions);
        self.notify(ConnectionEvent::Disconnected);
    }

    fn teardown_sessions(&mut self) -> Actions {
        self.sessions
            .values_mut()
            .flat_map(|session| session.teardown(Abort::ConnectionClosed))
            .collect()
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session, CoreError> {
        self.sessions.get_mut(&id).ok_or(CoreError::UnknownSession(id))
    }

    /// Look up a session.
    pub fn session_ref(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Session lifecycle state.
    ///
    /// # Errors
    ///
    /// `UnknownSession` if no such session exists.
    pub fn session_state(&self, id: SessionId) -> Result<EndpointState, CoreError> {
        self.sessions.get(&id).map(Session::state).ok_or(CoreError::UnknownSession(id))
    }

    /// Next free channel. Numbers wrap and skip sessions still held.
    fn allocate_session(&mut self) -> Result<SessionId, CoreError> {
        for _ in 0..=u16::MAX {
            let id = SessionId(self.next_session);
            self.next_session = self.next_session.wrapping_add(1);
            if !self.sessions.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(CoreError::IdsExhausted("channel"))
    }

    /// Next free handle. Among `len + 1` consecutive numbers one is free.
    fn allocate_link(&mut self) -> Result<LinkId, CoreError> {
        for _ in 0..=self.link_sessions.len() {
            let id = LinkId(self.next_link);
            self.next_link = self.next_link.wrapping_add(1);
            if !self.link_sessions.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(CoreError::IdsExhausted("handle"))
    }

    /// Drop links and sessions that reached `Closed`, with their routes.
    fn reap(&mut self) {
        let mut links = Vec::new();
        for session in self.sessions.values_mut() {
            links.extend(session.reap_closed_links());
        }
        for link in links {
            trace!(%link, "link released");
            self.link_sessions.remove(&link);
            self.router.forget_link(link);
            if self.default_sender == Some(link) {
                self.default_sender = None;
            }
        }

        let sessions: Vec<_> = self
            .sessions
            .values()
            .filter(|session| session.state().is_closed())
            .map(Session::id)
            .collect();
        for id in sessions {
            trace!(session = %id, "session released");
            if let Some(session) = self.sessions.remove(&id) {
                for link in session.links() {
                    self.link_sessions.remove(&link.id());
                    self.router.forget_link(link.id());
                }
            }
            self.router.forget_session(id);
            if self.default_session == Some(id) {
                self.default_session = None;
            }
        }
    }

    /// Create an unopened session.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after disconnect.
    pub fn session(&mut self) -> Result<SessionId, CoreError> {
        self.ensure_connected()?;
        let id = self.allocate_session()?;
        self.sessions.insert(id, Session::new(id));
        trace!(session = %id, "session created");
        Ok(id)
    }

    /// Begin a session.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `UnknownSession` for an unknown id
    /// - `IllegalState` if already begun
    pub fn open_session(&mut self, id: SessionId) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let actions = self.session_mut(id)?.open()?;
        self.emit(actions);
        Ok(())
    }

    /// End a session and every link on it.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `UnknownSession` for an unknown id
    /// - `IllegalState` if already ended
    pub fn close_session(
        &mut self,
        id: SessionId,
        condition: Option<ErrorCondition>,
    ) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let actions = self.session_mut(id)?.close(condition)?;
        self.emit(actions);
        self.reap();
        Ok(())
    }

    /// The default session, created and begun on first use.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after disconnect.
    pub fn default_session(&mut self) -> Result<SessionId, CoreError> {
        self.ensure_connected()?;
        if let Some(id) = self.default_session {
            if self.sessions.get(&id).is_some_and(|session| !session.state().is_closing()) {
                return Ok(id);
            }
        }

        let id = self.session()?;
        self.open_session(id)?;
        self.default_session = Some(id);
        Ok(id)
    }

    fn generate_name(&self, prefix: &str) -> String {
        format!("{prefix}-{:016x}", self.env.random_u64())
    }

    fn insert_link(&mut self, link: Link) -> Result<LinkId, CoreError> {
        let id = link.id();
        let session_id = link.session();
        let session = self.session_mut(session_id)?;
        if session.state().is_closing() {
            return Err(CoreError::IllegalState { state: session.state(), operation: "add link" });
        }
        session.insert_link(link);
        self.link_sessions.insert(id, session_id);
        Ok(id)
    }

    /// Create a sender on the default session.
    ///
    /// With no address the link targets the peer's anonymous relay and each
    /// message is routed by its own address.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after disconnect.
    pub fn create_sender(&mut self, address: Option<&str>) -> Result<LinkId, CoreError> {
        let session = self.default_session()?;
        self.create_named_sender(session, None, address)
    }

    /// Create an unopened sender on `session`.
    ///
    /// The source advertises every outcome. The name is generated when not
    /// given.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `UnknownSession` for an unknown session
    /// - `IllegalState` if the session has ended
    pub fn create_named_sender(
        &mut self,
        session: SessionId,
        name: Option<&str>,
        address: Option<&str>,
    ) -> Result<LinkId, CoreError> {
        self.ensure_connected()?;
        let id = self.allocate_link()?;
        let name = name.map_or_else(|| self.generate_name("sender"), str::to_owned);

        let target = match address {
            Some(address) => Target::new(address),
            None => {
                if self.endpoint.remotely_opened() && !self.anonymous_relay {
                    warn!(link = %id, "peer did not offer ANONYMOUS-RELAY; anonymous sender may be refused");
                }
                Target::anonymous()
            },
        };
        let source = Source {
            address: None,
            outcomes: Outcome::all_descriptors().into_iter().map(Symbol::new).collect(),
        };

        let mut link = Link::sender(id, session, name, self.config.auto_settle);
        link.set_source(Some(source))?;
        link.set_target(Some(target))?;
        self.insert_link(link)
    }

    /// The default anonymous sender, created and attached on first use.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after disconnect.
    pub fn default_sender(&mut self) -> Result<LinkId, CoreError> {
        self.ensure_connected()?;
        if let Some(id) = self.default_sender {
            if self.link(id).is_some_and(|link| !link.state().is_closing()) {
                return Ok(id);
            }
        }

        let id = self.create_sender(None)?;
        self.open_link(id)?;
        self.default_sender = Some(id);
        Ok(id)
    }

    /// Create a receiver for `address` on the default session.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after disconnect.
    pub fn create_receiver(&mut self, address: &str) -> Result<LinkId, CoreError> {
        let session = self.default_session()?;
        self.create_named_receiver(session, None, Some(address))
    }

    /// Create an unopened receiver on `session`.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `UnknownSession` for an unknown session
    /// - `IllegalState` if the session has ended
    pub fn create_named_receiver(
        &mut self,
        session: SessionId,
        name: Option<&str>,
        address: Option<&str>,
    ) -> Result<LinkId, CoreError> {
        self.ensure_connected()?;
        let id = self.allocate_link()?;
        let name = name.map_or_else(|| self.generate_name("receiver"), str::to_owned);

        let mut link = Link::receiver(id, session, name, self.config.auto_settle);
        link.set_source(address.map(Source::new))?;
        link.set_target(Some(Target::default()))?;
        self.insert_link(link)
    }

    /// Look up a link.
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        let session = self.link_sessions.get(&id)?;
        self.sessions.get(session)?.link(id)
    }

    fn link_mut(&mut self, id: LinkId) -> Result<&mut Link, CoreError> {
        let session = self.link_sessions.get(&id).ok_or(CoreError::UnknownLink(id))?;
        self.sessions
            .get_mut(session)
            .and_then(|session| session.link_mut(id))
            .ok_or(CoreError::UnknownLink(id))
    }

    fn existing_link(&self, id: LinkId) -> Result<&Link, CoreError> {
        self.link(id).ok_or(CoreError::UnknownLink(id))
    }

    /// Replace a link's source terms before it is attached.
    ///
    /// # Errors
    ///
    /// `IllegalState` once attached, `UnknownLink`, `ConnectionClosed`.
    pub fn set_source(&mut self, link: LinkId, source: Option<Source>) -> Result<(), CoreError> {
        self.ensure_connected()?;
        self.link_mut(link)?.set_source(source)
    }

    /// Replace a link's target terms before it is attached.
    ///
    /// # Errors
    ///
    /// `IllegalState` once attached, `UnknownLink`, `ConnectionClosed`.
    pub fn set_target(&mut self, link: LinkId, target: Option<Target>) -> Result<(), CoreError> {
        self.ensure_connected()?;
        self.link_mut(link)?.set_target(target)
    }

    /// Change a link's auto-settle flag.
    ///
    /// # Errors
    ///
    /// `IllegalState` once closing, `UnknownLink`, `ConnectionClosed`.
    pub fn set_auto_settle(&mut self, link: LinkId, auto_settle: bool) -> Result<(), CoreError> {
        self.ensure_connected()?;
        self.link_mut(link)?.set_auto_settle(auto_settle)
    }

    /// Choose how a receiver hands out messages.
    ///
    /// # Errors
    ///
    /// `WrongRole` on a sender, `IllegalState` once closing, `UnknownLink`,
    /// `ConnectionClosed`.
    pub fn set_receive_mode(&mut self, link: LinkId, mode: ReceiveMode) -> Result<(), CoreError> {
        self.ensure_connected()?;
        self.link_mut(link)?.set_receive_mode(mode)
    }

    /// Attach a link.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `UnknownLink` for an unknown id
    /// - `IllegalState` if the link was attached already or its session has
    ///   not begun
    pub fn open_link(&mut self, id: LinkId) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let session_id = self.existing_link(id)?.session();
        let session = self.session_mut(session_id)?;
        if !session.locally_opened() {
            return Err(CoreError::IllegalState { state: session.state(), operation: "open link" });
        }

        let actions = self.link_mut(id)?.open()?;
        self.emit(actions);
        Ok(())
    }

    /// Detach a link. Unsettled deliveries are aborted.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `UnknownLink` for an unknown id
    /// - `IllegalState` if already closed locally
    pub fn close_link(
        &mut self,
        id: LinkId,
        condition: Option<ErrorCondition>,
    ) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let actions = self.link_mut(id)?.close(condition)?;
        self.emit(actions);
        self.reap();
        Ok(())
    }

    /// Send a message with a generated tag, reporting disposition changes.
    ///
    /// # Errors
    ///
    /// See [`Self::send_with`].
    pub fn send(&mut self, link: LinkId, message: &Message) -> Result<DeliveryHandle, CoreError> {
        self.send_with(link, message, SendOptions::default())
    }

    /// Send a message.
    ///
    /// Never waits for credit: without credit the delivery is queued and
    /// goes out when the peer grants more.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `UnknownLink`, `WrongRole`
    /// - `IllegalState` once the link is closing
    /// - `DuplicateTag` if the tag belongs to an unsettled delivery
    /// - `Protocol` if the message cannot be encoded
    pub fn send_with(
        &mut self,
        link: LinkId,
        message: &Message,
        options: SendOptions,
    ) -> Result<DeliveryHandle, CoreError> {
        self.ensure_connected()?;
        let payload = message.encode()?;
        let (handle, actions) = self.link_mut(link)?.send(options.tag, payload, options.notify)?;
        self.emit(actions);
        Ok(handle)
    }

    /// Grant a receiver `credit` more deliveries.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed`, `UnknownLink`, `WrongRole`, or `IllegalState`
    /// once the link is closing.
    pub fn flow(&mut self, link: LinkId, credit: u32) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let actions = self.link_mut(link)?.flow(credit)?;
        self.emit(actions);
        Ok(())
    }

    /// Redeem a settle token.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after disconnect
    /// - `LinkClosed` if the delivery's link is closing or closed
    /// - `UnknownDelivery` if the delivery was already settled
    pub fn settle(&mut self, token: SettleToken, outcome: Outcome) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let handle = token.handle();
        // Tokens only exist for links we had, so a missing link was reaped
        let link = self.link_mut(handle.link).map_err(|_| CoreError::LinkClosed(handle.link))?;
        if link.state().is_closing() {
            return Err(CoreError::LinkClosed(handle.link));
        }

        let actions = link.settle(handle.delivery, Some(outcome))?;
        self.emit(actions);
        Ok(())
    }

    /// Settle any tracked delivery, inbound or outbound.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed`, `UnknownLink`, `UnknownDelivery`, or
    /// `IllegalState` once the link is closing.
    pub fn settle_delivery(
        &mut self,
        handle: DeliveryHandle,
        outcome: Option<Outcome>,
    ) -> Result<(), CoreError> {
        self.ensure_connected()?;
        let actions = self.link_mut(handle.link)?.settle(handle.delivery, outcome)?;
        self.emit(actions);
        Ok(())
    }

    /// Whether a send on `link` would be queued.
    ///
    /// # Errors
    ///
    /// `UnknownLink`.
    pub fn send_queue_full(&self, link: LinkId) -> Result<bool, CoreError> {
        Ok(self.existing_link(link)?.send_queue_full())
    }

    /// Available credit of `link`.
    ///
    /// # Errors
    ///
    /// `UnknownLink`.
    pub fn credit(&self, link: LinkId) -> Result<u32, CoreError> {
        Ok(self.existing_link(link)?.credit())
    }

    /// Lifecycle state of `link`.
    ///
    /// # Errors
    ///
    /// `UnknownLink`.
    pub fn link_state(&self, link: LinkId) -> Result<EndpointState, CoreError> {
        Ok(self.existing_link(link)?.state())
    }

    /// Target terms the peer announced for `link`.
    ///
    /// # Errors
    ///
    /// `UnknownLink`.
    pub fn remote_target(&self, link: LinkId) -> Result<Option<&Target>, CoreError> {
        Ok(self.existing_link(link)?.remote_target())
    }

    /// Source terms the peer announced for `link`.
    ///
    /// # Errors
    ///
    /// `UnknownLink`.
    pub fn remote_source(&self, link: LinkId) -> Result<Option<&Source>, CoreError> {
        Ok(self.existing_link(link)?.remote_source())
    }

    /// Unsettled deliveries on `link`.
    ///
    /// # Errors
    ///
    /// `UnknownLink`.
    pub fn unsettled(&self, link: LinkId) -> Result<usize, CoreError> {
        Ok(self.existing_link(link)?.unsettled())
    }

    /// Feed one engine event.
    ///
    /// Events nothing local matches are logged and dropped. Events after a
    /// disconnect are ignored.
    pub fn handle_event(&mut self, event: EngineEvent) {
        if self.disconnected {
            trace!("event after disconnect ignored");
            return;
        }

        let dispatch = self.router.resolve(event);
        let releases = matches!(
            dispatch,
            Dispatch::ConnectionClosed { .. }
                | Dispatch::SessionEnded { .. }
                | Dispatch::LinkDetached { .. }
        );
        match dispatch {
            Dispatch::ConnectionOpened {
                container_id,
                hostname,
                offered_capabilities,
                desired_capabilities,
                properties,
            } => self.on_remote_open(
                container_id,
                hostname,
                offered_capabilities,
                desired_capabilities,
                properties,
            ),
            Dispatch::ConnectionClosed { condition } => self.on_remote_close(condition),
            Dispatch::TransportClosed { reason } => {
                debug!(?reason, "transport closed");
                self.lose_transport();
            },
            Dispatch::SessionBegun { channel, answering } => self.on_begin(channel, answering),
            Dispatch::SessionEnded { session, channel, condition } => {
                self.router.unbind_session(channel);
                if let Ok(session) = self.session_mut(session) {
                    let actions = session.on_remote_close(condition);
                    self.emit(actions);
                }
            },
            Dispatch::LinkAttached { session, remote, name, role, source, target } => {
                self.on_attach(session, remote, name, role, source, target);
            },
            Dispatch::LinkDetached { link, remote, condition } => {
                self.router.unbind_link(remote);
                self.with_link(link, |link| link.on_remote_close(condition));
            },
            Dispatch::Flow { link, delivery_count, link_credit } => {
                self.with_link(link, |link| link.on_flow(delivery_count, link_credit));
            },
            Dispatch::Disposition { link, tag, state, settled } => {
                self.with_link(link, |link| link.on_disposition(&tag, state, settled));
            },
            Dispatch::Transfer { link, tag, payload, settled } => {
                self.with_link(link, |link| link.on_transfer(tag, &payload, settled));
            },
            Dispatch::Unroutable { reason } => warn!(reason, "dropping unroutable event"),
        }
        if releases {
            self.reap();
        }
    }

    fn with_link(&mut self, id: LinkId, apply: impl FnOnce(&mut Link) -> Actions) {
        match self.link_mut(id) {
            Ok(link) => {
                let actions = apply(link);
                self.emit(actions);
            },
            Err(err) => warn!(%err, "routed event for missing link"),
        }
    }

    fn on_remote_open(
        &mut self,
        container_id: String,
        hostname: Option<String>,
        offered_capabilities: Vec<Symbol>,
        desired_capabilities: Vec<Symbol>,
        properties: Properties,
    ) {
        if let Err(err) = self.endpoint.open_remote() {
            warn!(%err, "duplicate open from peer ignored");
            return;
        }

        self.anonymous_relay =
            offered_capabilities.iter().any(|capability| *capability == symbol::ANONYMOUS_RELAY);
        debug!(
            remote_container = %container_id,
            anonymous_relay = self.anonymous_relay,
            "connection opened remotely"
        );

        self.remote_container = Some(container_id.clone());
        self.remote_hostname = hostname;
        self.remote_capabilities = offered_capabilities;
        self.remote_desired_capabilities = desired_capabilities;
        self.remote_properties = properties;
        self.notify(ConnectionEvent::Opened {
            remote_container: container_id,
            anonymous_relay: self.anonymous_relay,
        });
    }

    fn on_remote_close(&mut self, condition: Option<ErrorCondition>) {
        let state = self.endpoint.close_remote();
        debug!(?state, ?condition, "connection closed remotely");
        self.remote_condition.clone_from(&condition);

        let actions = self.teardown_sessions();
        self.emit(actions);
        self.notify(ConnectionEvent::Closed { condition });
    }

    fn on_begin(&mut self, channel: SessionId, answering: Option<SessionId>) {
        if let Some(local) = answering {
            let Some(session) = self.sessions.get_mut(&local) else {
                warn!(session = %local, "begin answers an unknown session");
                return;
            };
            match session.on_remote_open(channel) {
                Ok(_) => self.router.bind_session(channel, local),
                Err(err) => warn!(session = %local, %err, "unexpected begin"),
            }
            return;
        }

        let id = match self.allocate_session() {
            Ok(id) => id,
            Err(err) => {
                warn!(%channel, %err, "cannot accept begin");
                return;
            },
        };
        let mut session = Session::new(id);
        if let Err(err) = session.on_remote_open(channel) {
            warn!(session = %id, %err, "unexpected begin");
            return;
        }
        self.sessions.insert(id, session);
        self.router.bind_session(channel, id);

        match self.config.session_open_policy {
            OpenPolicy::Notify => self.notify(ConnectionEvent::SessionOpened(id)),
            OpenPolicy::Reject => {
                debug!(session = %id, "rejecting peer-initiated session");
                if let Ok(actions) =
                    self.session_mut(id).and_then(|s| s.close(Some(ErrorCondition::not_supported())))
                {
                    self.emit(actions);
                }
            },
        }
    }

    fn on_attach(
        &mut self,
        session: SessionId,
        remote: RemoteLinkRef,
        name: String,
        role: Role,
        source: Option<Source>,
        target: Option<Target>,
    ) {
        let ours = role.opposite();
        let existing = self.sessions.get(&session).and_then(|s| s.find_unattached(&name, ours));

        let (id, peer_initiated) = match existing {
            Some(id) => (id, false),
            None => {
                let id = match self.allocate_link() {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(%session, %err, "cannot accept attach");
                        return;
                    },
                };
                let mut link = match ours {
                    Role::Sender => Link::sender(id, session, name, self.config.auto_settle),
                    Role::Receiver => Link::receiver(id, session, name, self.config.auto_settle),
                };
                // Mirror the peer's terms until the application says otherwise.
                let mirrored = link
                    .set_source(source.clone())
                    .and_then(|()| link.set_target(target.clone()))
                    .and_then(|()| self.insert_link(link));
                if let Err(err) = mirrored {
                    warn!(%session, %err, "cannot accept attach");
                    return;
                }
                (id, true)
            },
        };

        self.router.bind_link(remote, id);
        let mut actions = match self.link_mut(id).and_then(|l| l.on_remote_open(remote, source, target)) {
            Ok(actions) => actions,
            Err(err) => {
                warn!(link = %id, %err, "unexpected attach");
                return;
            },
        };

        if peer_initiated {
            let policy = match ours {
                Role::Sender => self.config.sender_open_policy,
                Role::Receiver => self.config.receiver_open_policy,
            };
            match (policy, ours) {
                (OpenPolicy::Notify, Role::Sender) => {
                    actions.push(ConnectionAction::Notify(ConnectionEvent::SenderOpened(id)));
                },
                (OpenPolicy::Notify, Role::Receiver) => {
                    actions.push(ConnectionAction::Notify(ConnectionEvent::ReceiverOpened(id)));
                },
                (OpenPolicy::Reject, _) => {
                    debug!(link = %id, ?ours, "rejecting peer-initiated link");
                    if let Ok(refusal) =
                        self.link_mut(id).and_then(|l| l.close(Some(ErrorCondition::not_supported())))
                    {
                        actions.extend(refusal);
                    }
                },
            }
        }
        self.emit(actions);
    }
}
