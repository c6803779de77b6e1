//! Scripted AMQP peer.
//!
//! [`MockServer`] answers a client the way a small broker would: it echoes
//! the client's open with a `pong: <container>` container id, accepts every
//! session and link, grants credit to client senders, and serves a few
//! well-known [`addresses`]:
//!
//! - a receiver on [`addresses::TWO_MESSAGES`] gets `"Hello"`, `"World"`
//! - a receiver on [`addresses::FIVE_MESSAGES`] gets `"1"` to `"5"`
//! - a message sent to [`addresses::ECHO`] comes back on every receiver
//!   attached to the echo source
//! - the body `"disconnect"` sent to [`addresses::COMMAND`] drops the
//!   transport
//!
//! Its open carries a [`PRODUCT_PROPERTY`] connection property.
//!
//! The server holds no connection of its own. It reacts to the events of a
//! connection it is handed, so the same script runs in the in-memory
//! [`crate::Loopback`] and behind a [`crate::Driver`] on a simulated network.

use linkflow_core::{Connection, ConnectionConfig, ConnectionEvent, CoreError, Environment};
use linkflow_proto::{LinkId, Message};
use tracing::{debug, trace, warn};

/// Addresses the server gives meaning to.
pub mod addresses {
    /// Messages sent here are sent back to echo receivers
    pub const ECHO: &str = "echo";
    /// Receivers get `"Hello"` and `"World"`
    pub const TWO_MESSAGES: &str = "two_messages";
    /// Receivers get `"1"` through `"5"`
    pub const FIVE_MESSAGES: &str = "five_messages";
    /// Control messages
    pub const COMMAND: &str = "command";
}

/// Connection property naming the server product.
pub const PRODUCT_PROPERTY: &str = "product";

/// Knobs for the scripted peer.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Offer `ANONYMOUS-RELAY` in the open
    pub anonymous_relay: bool,
    /// Credit granted to every client sender when it attaches
    pub receiver_credit: u32,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self { anonymous_relay: true, receiver_credit: 10 }
    }
}

/// The scripted peer.
#[derive(Debug, Default)]
pub struct MockServer {
    config: MockServerConfig,
    echo_senders: Vec<LinkId>,
    receivers: Vec<LinkId>,
    received: Vec<Message>,
}

impl MockServer {
    /// Server with the given behaviour.
    pub fn new(config: MockServerConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Configuration for the connection this server will drive.
    pub fn connection_config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::default()
            .with_container_id("mock-server")
            .with_property(PRODUCT_PROPERTY, "linkflow-mock-server")
            .accept_all();
        if self.config.anonymous_relay { config.with_anonymous_relay() } else { config }
    }

    /// Links on which the client sends to us.
    pub fn receivers(&self) -> &[LinkId] {
        &self.receivers
    }

    /// Every message the client sent us, in arrival order.
    pub fn received(&self) -> &[Message] {
        &self.received
    }

    /// React to one event of `connection`.
    pub fn handle<E: Environment>(&mut self, connection: &mut Connection<E>, event: ConnectionEvent) {
        trace!(?event, "mock server event");
        let result = match event {
            ConnectionEvent::Opened { remote_container, .. } => {
                Self::answer_open(connection, &remote_container)
            },
            ConnectionEvent::SessionOpened(session) => connection.open_session(session),
            ConnectionEvent::SenderOpened(link) => self.serve_receiver(connection, link),
            ConnectionEvent::ReceiverOpened(link) => self.accept_sender(connection, link),
            ConnectionEvent::Message { message, .. } => self.on_message(connection, message),
            ConnectionEvent::LinkClosed { link, .. } => {
                ignore_closing(connection.close_link(link, None))
            },
            ConnectionEvent::SessionClosed { session, .. } => {
                ignore_closing(connection.close_session(session, None))
            },
            ConnectionEvent::Closed { .. } => ignore_closing(connection.close(None)),
            ConnectionEvent::LinkActive(_)
            | ConnectionEvent::DeliveryUpdated { .. }
            | ConnectionEvent::SendQueueDrained(_)
            | ConnectionEvent::Disconnected => Ok(()),
        };

        if let Err(err) = result {
            warn!(%err, "mock server could not react");
        }
    }

    fn answer_open<E: Environment>(
        connection: &mut Connection<E>,
        remote_container: &str,
    ) -> Result<(), CoreError> {
        connection.set_container_id(format!("pong: {remote_container}"))?;
        connection.open()
    }

    /// The client attached a receiver; we send.
    fn serve_receiver<E: Environment>(
        &mut self,
        connection: &mut Connection<E>,
        link: LinkId,
    ) -> Result<(), CoreError> {
        let source = connection
            .remote_source(link)?
            .and_then(|source| source.address.clone())
            .unwrap_or_default();
        connection.open_link(link)?;
        debug!(%link, %source, "serving receiver");

        let bodies: &[&str] = match source.as_str() {
            addresses::TWO_MESSAGES => &["Hello", "World"],
            addresses::FIVE_MESSAGES => &["1", "2", "3", "4", "5"],
            addresses::ECHO => {
                self.echo_senders.push(link);
                &[]
            },
            _ => &[],
        };
        for body in bodies {
            connection.send(link, &Message::text(source.as_str(), *body))?;
        }
        Ok(())
    }

    /// The client attached a sender; we receive.
    fn accept_sender<E: Environment>(
        &mut self,
        connection: &mut Connection<E>,
        link: LinkId,
    ) -> Result<(), CoreError> {
        if self.config.receiver_credit > 0 {
            connection.flow(link, self.config.receiver_credit)?;
        }
        connection.open_link(link)?;
        self.receivers.push(link);
        Ok(())
    }

    fn on_message<E: Environment>(
        &mut self,
        connection: &mut Connection<E>,
        message: Message,
    ) -> Result<(), CoreError> {
        let address = message.address.as_deref();
        if address == Some(addresses::COMMAND) && message.body_text() == Some("disconnect") {
            debug!("disconnect requested by client");
            connection.disconnect();
        } else if address == Some(addresses::ECHO) {
            for link in &self.echo_senders {
                connection.send(*link, &message)?;
            }
        }
        self.received.push(message);
        Ok(())
    }
}

/// Answering a close the peer started may race our own; that is fine.
/// Endpoints closed on both sides are already released.
fn ignore_closing(result: Result<(), CoreError>) -> Result<(), CoreError> {
    match result {
        Err(
            CoreError::IllegalState { .. }
            | CoreError::ConnectionClosed
            | CoreError::UnknownLink(_)
            | CoreError::UnknownSession(_),
        ) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_capability_follows_config() {
        let server = MockServer::default();
        assert_eq!(server.connection_config().offered_capabilities.len(), 1);

        let server = MockServer::new(MockServerConfig { anonymous_relay: false, ..Default::default() });
        assert!(server.connection_config().offered_capabilities.is_empty());
    }
}
