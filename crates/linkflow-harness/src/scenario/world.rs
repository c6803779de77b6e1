//! World state for scenario execution.
//!
//! The World owns the connection pair and records every client event in
//! arrival order. Settle tokens are split off and kept for the script to
//! redeem when it chooses.

use std::collections::VecDeque;

use linkflow_core::{Connection, ConnectionEvent, SettleToken};
use linkflow_proto::{LinkId, Message};

use crate::{loopback::Loopback, mock_server::MockServer, sim_env::SimEnv};

/// A client event with its settle token taken out.
#[derive(Debug, PartialEq, Eq)]
pub enum Observed {
    /// Message with its body
    Message {
        /// Receiving link
        link: LinkId,
        /// Message
        message: Message,
    },
    /// Any other event
    Event(ConnectionEvent),
}

/// Connection pair plus everything the client observed.
pub struct World {
    pair: Loopback,
    observed: Vec<Observed>,
    tokens: VecDeque<SettleToken>,
}

impl World {
    pub(crate) fn new(pair: Loopback) -> Self {
        Self { pair, observed: Vec::new(), tokens: VecDeque::new() }
    }

    /// Pump the pair until quiet and record new client events.
    pub fn run(&mut self) {
        self.pair.run();
        while let Some(event) = self.pair.next_client_event() {
            match event {
                ConnectionEvent::Message { delivery, message, settle } => {
                    if let Some(token) = settle {
                        self.tokens.push_back(token);
                    }
                    self.observed.push(Observed::Message { link: delivery.link, message });
                },
                other => self.observed.push(Observed::Event(other)),
            }
        }
    }

    /// Client connection.
    pub fn client(&self) -> &Connection<SimEnv> {
        self.pair.client()
    }

    /// Client connection, for application calls.
    pub fn client_mut(&mut self) -> &mut Connection<SimEnv> {
        self.pair.client_mut()
    }

    /// Server connection.
    pub fn server(&self) -> &Connection<SimEnv> {
        self.pair.server()
    }

    /// Server script state.
    pub fn mock(&self) -> &MockServer {
        self.pair.mock()
    }

    /// The underlying pair.
    pub fn pair(&self) -> &Loopback {
        &self.pair
    }

    /// Open the client connection and pump.
    pub fn open(&mut self) -> Result<(), String> {
        self.client_mut().open().map_err(|e| e.to_string())?;
        self.run();
        Ok(())
    }

    /// Everything the client observed.
    pub fn observed(&self) -> &[Observed] {
        &self.observed
    }

    /// Bodies of received messages, in order.
    pub fn message_bodies(&self) -> Vec<String> {
        self.observed
            .iter()
            .filter_map(|observed| match observed {
                Observed::Message { message, .. } => message.body_text().map(str::to_owned),
                Observed::Event(_) => None,
            })
            .collect()
    }

    /// How often the client saw `event`.
    pub fn count(&self, event: &ConnectionEvent) -> usize {
        self.observed.iter().filter(|o| matches!(o, Observed::Event(e) if e == event)).count()
    }

    /// Settle tokens not yet redeemed.
    pub fn pending_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Take the oldest unredeemed settle token.
    pub fn take_token(&mut self) -> Option<SettleToken> {
        self.tokens.pop_front()
    }
}
