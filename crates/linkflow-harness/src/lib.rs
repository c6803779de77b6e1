//! Deterministic simulation harness for the linkflow engine.
//!
//! Seeded implementations of the Environment and Transport traits, an
//! in-memory [`Loopback`] that pairs a client connection with a scripted
//! [`MockServer`] peer, a [`Driver`] that runs a connection over any
//! transport, and a scenario builder that insists on an oracle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod loopback;
pub mod mock_server;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use driver::Driver;
pub use loopback::Loopback;
pub use mock_server::{MockServer, MockServerConfig, PRODUCT_PROPERTY, addresses};
pub use scenario::{Observed, RunnableScenario, Scenario, World};
pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
