//! Runs one connection over one transport.
//!
//! The driver is the single task that owns a [`Connection`]. Application
//! code mutates the connection through [`Driver::connection_mut`] and then
//! awaits [`Driver::next_event`], which executes queued actions and reads
//! peer frames until an application event is ready.
//!
//! Transport failures are never returned as errors: they are fed back into
//! the connection as [`EngineEvent::TransportClosed`] and surface as
//! [`ConnectionEvent::Disconnected`].

use std::collections::VecDeque;

use linkflow_core::{Connection, ConnectionAction, ConnectionEvent, Environment, Transport};
use linkflow_proto::EngineEvent;
use tracing::{debug, trace};

/// Cooperative loop for one connection.
#[derive(Debug)]
pub struct Driver<E: Environment, T: Transport> {
    connection: Connection<E>,
    transport: T,
    events: VecDeque<ConnectionEvent>,
    closed: bool,
}

impl<E: Environment, T: Transport> Driver<E, T> {
    /// Drive `connection` over `transport`.
    pub fn new(connection: Connection<E>, transport: T) -> Self {
        Self { connection, transport, events: VecDeque::new(), closed: false }
    }

    /// The connection.
    pub fn connection(&self) -> &Connection<E> {
        &self.connection
    }

    /// The connection, for application calls.
    pub fn connection_mut(&mut self) -> &mut Connection<E> {
        &mut self.connection
    }

    /// Whether the transport is gone.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Execute every queued action.
    pub async fn flush(&mut self) {
        while let Some(action) = self.connection.poll_action() {
            match action {
                ConnectionAction::SendFrame(frame) => {
                    if self.closed {
                        continue;
                    }
                    trace!(frame = frame.name(), "write");
                    if let Err(err) = self.transport.write_frame(&frame).await {
                        self.lose_transport(err.to_string());
                    }
                },
                ConnectionAction::Flush => {
                    if self.closed {
                        continue;
                    }
                    if let Err(err) = self.transport.flush().await {
                        self.lose_transport(err.to_string());
                    }
                },
                ConnectionAction::Disconnect => {
                    self.closed = true;
                    if let Err(err) = self.transport.disconnect().await {
                        debug!(%err, "transport shutdown failed");
                    }
                },
                ConnectionAction::Notify(event) => self.events.push_back(event),
            }
        }
    }

    fn lose_transport(&mut self, reason: String) {
        debug!(%reason, "transport lost");
        self.closed = true;
        self.connection.handle_event(EngineEvent::TransportClosed { reason: Some(reason) });
    }

    /// Next application event.
    ///
    /// Returns `None` once the transport is gone and every event has been
    /// handed out.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            self.flush().await;
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if self.closed {
                return None;
            }

            match self.transport.read_frame().await {
                Ok(Some(frame)) => {
                    trace!(frame = frame.name(), "read");
                    self.connection.handle_event(EngineEvent::from(frame));
                },
                Ok(None) => {
                    debug!("peer closed the stream");
                    self.closed = true;
                    self.connection.handle_event(EngineEvent::TransportClosed { reason: None });
                },
                Err(err) => self.lose_transport(err.to_string()),
            }
        }
    }
}
