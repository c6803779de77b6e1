//! Application messages.
//!
//! A message is what the application hands to `send` and what a receiver's
//! message event carries. On a transfer it travels as a CBOR document; the
//! engine treats those bytes as opaque payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Message body section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Single string value
    Value(String),
    /// Opaque binary data
    Data(Vec<u8>),
}

/// An application message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Destination address, used by relaying peers for anonymous links
    pub address: Option<String>,
    /// Optional subject
    pub subject: Option<String>,
    /// Body section
    pub body: Body,
}

impl Message {
    /// Message to `address` carrying a string body.
    pub fn text(address: impl Into<String>, value: impl Into<String>) -> Self {
        Self { address: Some(address.into()), subject: None, body: Body::Value(value.into()) }
    }

    /// String body, if the body is a value section.
    pub fn body_text(&self) -> Option<&str> {
        match &self.body {
            Body::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Encode as transfer payload.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::Encode { what: "message", reason: e.to_string() })?;
        Ok(Bytes::from(buf))
    }

    /// Decode a transfer payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(payload)
            .map_err(|e| ProtocolError::Decode { what: "message", reason: e.to_string() })
    }
}
