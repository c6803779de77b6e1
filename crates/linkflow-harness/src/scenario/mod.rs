//! Scenario tests with mandatory oracles.
//!
//! A scenario wires a client to the [`crate::MockServer`], runs a script
//! against the pair and then hands the final [`World`] to an oracle. The
//! builder only exposes `run` after an oracle is set, so no scenario can
//! skip verification.
//!
//! ```ignore
//! Scenario::new("identification")
//!     .client(ConnectionConfig::default().with_container_id("foo"))
//!     .script(Box::new(|world| world.open()))
//!     .oracle(oracle::remote_container_is("pong: foo"))
//!     .run()?;
//! ```

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario};
pub use world::{Observed, World};

/// Drives the pair. Errors abort the scenario before the oracle runs.
pub type ScriptFn = Box<dyn FnOnce(&mut World) -> Result<(), String>>;

/// Verifies the final world.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;
