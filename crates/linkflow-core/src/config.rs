//! Connection configuration.

use linkflow_proto::{DeliveryTag, Properties, Symbol};

/// What to do when the peer opens an endpoint we did not ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenPolicy {
    /// Refuse it with a "Not Supported" condition
    #[default]
    Reject,
    /// Report it to the application, which opens or closes it
    Notify,
}

/// How a receiver hands inbound deliveries to the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Settled as accepted right after the message is reported, when
    /// auto-settle is on
    #[default]
    Synchronous,
    /// Every message carries a [`crate::SettleToken`]; nothing settles until
    /// the application redeems it
    Deferred,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Container id; generated from the environment when `None`
    pub container_id: Option<String>,
    /// Virtual host to ask the peer for
    pub hostname: Option<String>,
    /// Capabilities to offer the peer
    pub offered_capabilities: Vec<Symbol>,
    /// Capabilities we would like the peer to have
    pub desired_capabilities: Vec<Symbol>,
    /// Connection properties sent with our open
    pub properties: Properties,
    /// Peer-initiated sessions
    pub session_open_policy: OpenPolicy,
    /// Peer-attached receiving links (we send)
    pub sender_open_policy: OpenPolicy,
    /// Peer-attached sending links (we receive)
    pub receiver_open_policy: OpenPolicy,
    /// Auto-settle flag for new links
    pub auto_settle: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            container_id: None,
            hostname: None,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: Properties::new(),
            session_open_policy: OpenPolicy::Reject,
            sender_open_policy: OpenPolicy::Reject,
            receiver_open_policy: OpenPolicy::Reject,
            auto_settle: true,
        }
    }
}

impl ConnectionConfig {
    /// Set the container id.
    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    /// Offer the anonymous-relay capability.
    pub fn with_anonymous_relay(mut self) -> Self {
        self.offered_capabilities.push(Symbol::anonymous_relay());
        self
    }

    /// Add a connection property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(Symbol::new(key), value.into());
        self
    }

    /// Report every peer-initiated endpoint instead of rejecting it.
    pub fn accept_all(mut self) -> Self {
        self.session_open_policy = OpenPolicy::Notify;
        self.sender_open_policy = OpenPolicy::Notify;
        self.receiver_open_policy = OpenPolicy::Notify;
        self
    }
}

/// Per-send options.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Tag to use; generated when `None`
    pub tag: Option<DeliveryTag>,
    /// Report disposition changes as [`crate::ConnectionEvent::DeliveryUpdated`]
    pub notify: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self { tag: None, notify: true }
    }
}

impl SendOptions {
    /// Send with an explicit tag.
    pub fn tagged(tag: impl Into<DeliveryTag>) -> Self {
        Self { tag: Some(tag.into()), notify: true }
    }

    /// Do not report disposition changes. Terminal aborts are still reported.
    pub fn quiet(mut self) -> Self {
        self.notify = false;
        self
    }
}
