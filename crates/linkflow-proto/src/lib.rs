//! Logical vocabulary for the linkflow AMQP 1.0 adapter.
//!
//! Everything the link engine exchanges with its collaborators lives here:
//! endpoint identifiers, link terms, delivery outcomes, error conditions,
//! application messages, the logical frames ([`Performative`]) the engine
//! emits, and the [`EngineEvent`]s it consumes.
//!
//! Real AMQP wire encoding belongs to the protocol engine. The only byte
//! formats defined in this crate are the CBOR message body carried inside a
//! transfer and a length-prefixed frame codec used by the simulation
//! transport.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod condition;
pub mod errors;
pub mod event;
pub mod frame;
pub mod ids;
pub mod message;
pub mod outcome;
pub mod performative;
pub mod symbol;
pub mod terms;

pub use condition::ErrorCondition;
pub use errors::{ProtocolError, Result};
pub use event::{EndpointRef, EngineEvent, RemoteEndpoint, RemoteLinkRef};
pub use ids::{DeliveryId, DeliveryTag, LinkId, SessionId};
pub use message::{Body, Message};
pub use outcome::Outcome;
pub use performative::{Performative, Properties};
pub use symbol::Symbol;
pub use terms::{Role, Source, Target};
