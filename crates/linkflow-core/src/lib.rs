//! Link credit-flow and delivery-settlement engine for AMQP 1.0.
//!
//! Pure state machine logic, decoupled from I/O. The engine consumes
//! [`EngineEvent`](linkflow_proto::EngineEvent)s decoded by a protocol
//! engine and produces [`ConnectionAction`]s: frames to send, transport
//! requests and application events.
//!
//! # Architecture
//!
//! State transitions never touch sockets, clocks or ambient randomness.
//! Every effect is described by an action that a driver or test harness
//! executes. Randomness (container ids, link names) comes from an
//! [`Environment`] supplied at construction.
//!
//! Ownership is strictly hierarchical: a [`Connection`] owns its
//! [`Session`]s, a session owns its [`Link`]s, and a link owns its credit
//! ledger and delivery registry.
//!
//! # Components
//!
//! - [`credit`]: Sender and receiver credit ledgers
//! - [`delivery`]: Unsettled delivery tracking and disposition correlation
//! - [`link`]: Link state machine (send, flow, settle, open, close)
//! - [`session`]: Sessions and the links they own
//! - [`dispatcher`]: Peer numbering to local ids
//! - [`connection`]: Connection supervisor and application surface
//! - [`endpoint`]: Shared open/close lifecycle
//! - [`mod@env`]: Environment abstraction (randomness)
//! - [`transport`]: Transport abstraction (framed stream)
//! - [`error`]: Core error types

pub mod config;
pub mod connection;
pub mod credit;
pub mod delivery;
pub mod dispatcher;
pub mod endpoint;
pub mod env;
pub mod error;
pub mod event;
pub mod link;
pub mod session;
pub mod transport;

pub use config::{ConnectionConfig, OpenPolicy, ReceiveMode, SendOptions};
pub use connection::Connection;
pub use endpoint::EndpointState;
pub use env::{Environment, SystemEnv};
pub use error::CoreError;
pub use event::{
    Abort, ConnectionAction, ConnectionEvent, DeliveryHandle, DeliveryUpdate, SettleToken,
};
pub use link::Link;
pub use session::Session;
pub use transport::Transport;
