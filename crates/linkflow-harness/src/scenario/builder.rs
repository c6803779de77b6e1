//! Scenario builder API.

use linkflow_core::ConnectionConfig;

use crate::{
    loopback::Loopback,
    mock_server::MockServerConfig,
    scenario::{OracleFn, ScriptFn, World},
};

/// Scenario under construction.
///
/// Call `.oracle()` to get a [`RunnableScenario`].
pub struct Scenario {
    name: String,
    seed: u64,
    client: ConnectionConfig,
    server: MockServerConfig,
    scripts: Vec<ScriptFn>,
}

impl Scenario {
    /// Scenario with default client and server.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: 0,
            client: ConnectionConfig::default(),
            server: MockServerConfig::default(),
            scripts: Vec::new(),
        }
    }

    /// Seed for the simulated environment.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Client configuration.
    pub fn client(mut self, config: ConnectionConfig) -> Self {
        self.client = config;
        self
    }

    /// Server behaviour.
    pub fn server(mut self, config: MockServerConfig) -> Self {
        self.server = config;
        self
    }

    /// Append a script step. Steps run in order; the pair is pumped until
    /// quiet after each.
    pub fn script(mut self, step: ScriptFn) -> Self {
        self.scripts.push(step);
        self
    }

    /// Set the oracle and return a runnable scenario.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute every step, then the oracle.
    pub fn run(self) -> Result<(), String> {
        let Scenario { name, seed, client, server, scripts } = self.scenario;
        let mut world = World::new(Loopback::with_config(seed, client, server));

        for (index, step) in scripts.into_iter().enumerate() {
            step(&mut world).map_err(|e| format!("Scenario '{name}': step {index} failed: {e}"))?;
            world.run();
        }

        (self.oracle)(&world).map_err(|e| format!("Scenario '{name}': oracle failed: {e}"))
    }
}
