//! # Node Model
//!
//! The minimal view of the server-hosted tree the client engine needs in
//! order to carry nodes across the wire. Field-level schema rules are
//! enforced by the server, not here.

use rand::RngCore;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Dynamic msgpack value used for attributes, data values and call params.
pub type Value = rmpv::Value;

/// Length of a node identifier in bytes.
pub const NODE_ID_LEN: usize = 24;

/// Opaque 24-byte node identifier, serialized as a msgpack `bin` value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// The root of the tree.
    pub const ROOT: NodeId = NodeId([0u8; NODE_ID_LEN]);

    /// Generate a fresh random identifier (never the root).
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; NODE_ID_LEN];
        loop {
            rand::thread_rng().fill_bytes(&mut bytes);
            if bytes != [0u8; NODE_ID_LEN] {
                return Self(bytes);
            }
        }
    }

    /// Build an identifier from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Whether this is the root node.
    #[must_use]
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::ROOT
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Error parsing a [`NodeId`] from its hex form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdError {
    /// Not valid hex.
    #[error("invalid node id hex: {0}")]
    Hex(String),
    /// Valid hex of the wrong length.
    #[error("node id must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|e| NodeIdError::Hex(e.to_string()))?;
        Self::try_from(raw.as_slice())
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = NodeIdError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; NODE_ID_LEN] = raw.try_into().map_err(|_| NodeIdError::Length {
            expected: NODE_ID_LEN,
            actual: raw.len(),
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NodeIdVisitor;

        impl<'de> Visitor<'de> for NodeIdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} bytes of node id", NODE_ID_LEN)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<NodeId, E> {
                NodeId::try_from(v).map_err(E::custom)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<NodeId, A::Error> {
                let mut raw = Vec::with_capacity(NODE_ID_LEN);
                while let Some(byte) = seq.next_element::<u8>()? {
                    raw.push(byte);
                }
                NodeId::try_from(raw.as_slice()).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_bytes(NodeIdVisitor)
    }
}

/// Snapshot of a node as sent in `get_reply` / `get_list_reply`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub pos_start: Option<i64>,
    #[serde(default)]
    pub pos_end: Option<i64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attr: BTreeMap<String, Value>,
    /// Keys of data values present on the node.
    #[serde(default)]
    pub data: BTreeSet<String>,
    /// Lengths of bindata blobs, by key.
    #[serde(default)]
    pub bindata: BTreeMap<String, u64>,
}

impl Node {
    /// A bare node with the given id and nothing else set.
    #[must_use]
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// Position filter for child listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PosFilter {
    #[serde(default)]
    pub start_from: Option<i64>,
    #[serde(default)]
    pub start_to: Option<i64>,
    #[serde(default)]
    pub end_from: Option<i64>,
    #[serde(default)]
    pub end_to: Option<i64>,
}
