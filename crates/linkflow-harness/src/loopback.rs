//! In-memory connection pair.
//!
//! A [`Loopback`] wires a client [`Connection`] to a server connection run
//! by a [`MockServer`]. Frames one side queues are translated with
//! [`EngineEvent::from`] and fed straight into the other side, in order.
//! A `Disconnect` severs the pair: the other side sees
//! [`EngineEvent::TransportClosed`] and nothing crosses afterwards.
//!
//! Client events are collected for the test to inspect; server events go
//! to the mock server's script.

use std::collections::VecDeque;

use linkflow_core::{Connection, ConnectionAction, ConnectionConfig, ConnectionEvent};
use linkflow_proto::EngineEvent;
use tracing::{trace, warn};

use crate::{
    mock_server::{MockServer, MockServerConfig},
    sim_env::SimEnv,
};

/// Upper bound on pump rounds before [`Loopback::run`] gives up.
const MAX_ROUNDS: usize = 10_000;

/// Client and scripted server joined back to back.
#[derive(Debug)]
pub struct Loopback {
    client: Connection<SimEnv>,
    server: Connection<SimEnv>,
    mock: MockServer,
    client_events: VecDeque<ConnectionEvent>,
    frames_from_client: usize,
    frames_from_server: usize,
    severed: bool,
}

impl Loopback {
    /// Pair with a default client and default server behaviour.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, ConnectionConfig::default(), MockServerConfig::default())
    }

    /// Pair with explicit configuration.
    pub fn with_config(seed: u64, client: ConnectionConfig, server: MockServerConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let mock = MockServer::new(server);
        Self {
            client: Connection::new(env.clone(), client),
            server: Connection::new(env, mock.connection_config()),
            mock,
            client_events: VecDeque::new(),
            frames_from_client: 0,
            frames_from_server: 0,
            severed: false,
        }
    }

    /// The client connection.
    pub fn client(&self) -> &Connection<SimEnv> {
        &self.client
    }

    /// The client connection, for application calls.
    pub fn client_mut(&mut self) -> &mut Connection<SimEnv> {
        &mut self.client
    }

    /// The server connection.
    pub fn server(&self) -> &Connection<SimEnv> {
        &self.server
    }

    /// The server connection, for calls outside the mock's script.
    pub fn server_mut(&mut self) -> &mut Connection<SimEnv> {
        &mut self.server
    }

    /// The server's script and what it observed.
    pub fn mock(&self) -> &MockServer {
        &self.mock
    }

    /// Frames the client sent across.
    pub fn frames_from_client(&self) -> usize {
        self.frames_from_client
    }

    /// Frames the server sent across.
    pub fn frames_from_server(&self) -> usize {
        self.frames_from_server
    }

    /// Whether either side disconnected.
    pub fn is_severed(&self) -> bool {
        self.severed
    }

    /// Oldest client event not yet taken.
    pub fn next_client_event(&mut self) -> Option<ConnectionEvent> {
        self.client_events.pop_front()
    }

    /// Every client event not yet taken.
    pub fn take_client_events(&mut self) -> Vec<ConnectionEvent> {
        self.client_events.drain(..).collect()
    }

    /// Exchange actions until both sides are quiet. Returns the number of
    /// rounds that moved something.
    pub fn run(&mut self) -> usize {
        for round in 0..MAX_ROUNDS {
            let mut moved = false;
            while let Some(action) = self.client.poll_action() {
                moved = true;
                self.apply_client(action);
            }
            while let Some(action) = self.server.poll_action() {
                moved = true;
                self.apply_server(action);
            }
            if !moved {
                return round;
            }
        }
        warn!(rounds = MAX_ROUNDS, "loopback did not settle");
        MAX_ROUNDS
    }

    fn apply_client(&mut self, action: ConnectionAction) {
        match action {
            ConnectionAction::SendFrame(frame) => {
                if self.severed {
                    return;
                }
                trace!(frame = frame.name(), "client -> server");
                self.frames_from_client += 1;
                self.server.handle_event(EngineEvent::from(frame));
            },
            ConnectionAction::Flush => {},
            ConnectionAction::Disconnect => {
                self.severed = true;
                self.server.handle_event(EngineEvent::TransportClosed {
                    reason: Some("client disconnected".into()),
                });
            },
            ConnectionAction::Notify(event) => self.client_events.push_back(event),
        }
    }

    fn apply_server(&mut self, action: ConnectionAction) {
        match action {
            ConnectionAction::SendFrame(frame) => {
                if self.severed {
                    return;
                }
                trace!(frame = frame.name(), "server -> client");
                self.frames_from_server += 1;
                self.client.handle_event(EngineEvent::from(frame));
            },
            ConnectionAction::Flush => {},
            ConnectionAction::Disconnect => {
                self.severed = true;
                self.client.handle_event(EngineEvent::TransportClosed {
                    reason: Some("server disconnected".into()),
                });
            },
            ConnectionAction::Notify(event) => self.mock.handle(&mut self.server, event),
        }
    }
}
