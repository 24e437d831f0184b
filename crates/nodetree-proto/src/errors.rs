//! Errors-as-data carried inside protocol messages.

use crate::node::{NodeId, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known error codes used by the client itself.
pub mod codes {
    /// A plugin handler does not implement the requested capability.
    pub const UNSUPPORTED: &str = "unsupported";
    /// A plugin handler panicked before producing a result.
    pub const PLUGIN_PANICKED: &str = "plugin_panicked";
    /// The node referenced by an operation no longer exists.
    pub const OBJECT_GONE: &str = "object_gone";
}

/// A server- or plugin-reported failure: `(code, message)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: String,
    pub msg: String,
}

impl RemoteError {
    /// Create a new remote error.
    pub fn new(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            msg: msg.into(),
        }
    }

    /// Handler does not support the invoked capability.
    pub fn unsupported(capability: &str) -> Self {
        Self::new(
            codes::UNSUPPORTED,
            format!("plugin handler does not support {}", capability),
        )
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.msg)
    }
}

impl std::error::Error for RemoteError {}

/// A diagnostic annotation recorded while answering a query or running a
/// trigger: which parts of the tree the outcome depended on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check_type", rename_all = "snake_case")]
pub enum Check {
    /// The node was (or was not) present.
    Gone { node: NodeId },
    /// The node's parent was observed.
    Parent { node: NodeId, parent: Option<NodeId> },
    /// Presence of a tag was observed.
    Tag { node: NodeId, tag: String, present: bool },
    /// An attribute value was observed.
    Attr { node: NodeId, key: String, data: Value },
    /// A data value was observed.
    Data { node: NodeId, key: String, data: Value },
    /// Length of a bindata blob was observed.
    BinDataSize { node: NodeId, key: String, size: u64 },
}

impl Check {
    /// Node the check concerns.
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Check::Gone { node }
            | Check::Parent { node, .. }
            | Check::Tag { node, .. }
            | Check::Attr { node, .. }
            | Check::Data { node, .. }
            | Check::BinDataSize { node, .. } => *node,
        }
    }
}
