//! Endpoint and delivery identifiers.
//!
//! Sessions and links are numbered by whichever side created the local
//! endpoint: a [`SessionId`] is the local channel and a [`LinkId`] the local
//! handle. Frames always carry the sender's own numbering, so the same link
//! has a different id on each side of a connection.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Local session number (AMQP channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u16);

/// Local link number (AMQP handle). Never reused within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

/// Opaque local identity of one delivery on one link. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link:{}", self.0)
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery:{}", self.0)
    }
}

/// Delivery tag chosen by the sending side.
///
/// Tags only need to be unique among the unsettled deliveries of one link,
/// so a tag may be reused once its previous delivery is settled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryTag(Bytes);

impl DeliveryTag {
    /// Create a tag from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Tag derived from a counter, as used for generated tags.
    pub fn from_counter(counter: u64) -> Self {
        Self(Bytes::copy_from_slice(&counter.to_be_bytes()))
    }

    /// Raw tag bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for DeliveryTag {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for DeliveryTag {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_tags_are_big_endian() {
        let tag = DeliveryTag::from_counter(0x0102);
        assert_eq!(tag.as_bytes(), &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(tag.to_string(), "0000000000000102");
    }

    #[test]
    fn empty_tag_displays_as_empty() {
        assert_eq!(DeliveryTag::from("").to_string(), "");
    }
}
