//! A 12-byte BSON ObjectId.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A 12-byte BSON ObjectId: a 4-byte timestamp, a 5-byte random process identifier, and a 3-byte
/// counter, all big-endian. Ordering between two ids is defined by unsigned byte comparison, which
/// is what the topology-version and election-id comparisons in the SDAM spec rely on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generates a new ObjectId seeded from the current time and a random process/counter value.
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        bytes[0..4].copy_from_slice(&millis.to_be_bytes());
        rand::rng().fill_bytes(&mut bytes[4..12]);
        Self(bytes)
    }

    /// Constructs an ObjectId from raw bytes, as read off the wire.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of this ObjectId.
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parses an ObjectId from its 24-character hex representation.
    pub fn parse_str(s: &str) -> Result<Self, InvalidObjectId> {
        if s.len() != 24 {
            return Err(InvalidObjectId);
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidObjectId)?;
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self([0; 12])
    }
}

/// Error returned when parsing a malformed hex ObjectId string.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("invalid object id")]
pub struct InvalidObjectId;

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(\"{}\")", self)
    }
}

impl Serialize for ObjectId {
    /// Serializes as its hex string, matching how [`super::de::Deserializer`] hands a
    /// `Bson::ObjectId` value back to a visitor (`visit_string`, not `visit_bytes`) — so this
    /// round-trips through the crate's own serde bridge without losing bytes to a mismatched
    /// visitor call.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct ObjectIdVisitor;

impl serde::de::Visitor<'_> for ObjectIdVisitor {
    type Value = ObjectId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 24-character hex ObjectId string or 12 raw bytes")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<ObjectId, E> {
        ObjectId::parse_str(v).map_err(|_| E::custom("invalid ObjectId hex string"))
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<ObjectId, E> {
        <[u8; 12]>::try_from(v)
            .map(ObjectId)
            .map_err(|_| E::custom("ObjectId must be exactly 12 bytes"))
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<ObjectId, E> {
        self.visit_bytes(&v)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(ObjectIdVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordering_is_byte_lexicographic() {
        let a = ObjectId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let b = ObjectId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        assert!(a < b);
    }

    #[test]
    fn round_trips_hex() {
        let id = ObjectId::new();
        let parsed = ObjectId::parse_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
