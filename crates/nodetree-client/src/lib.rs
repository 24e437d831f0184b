//! # Nodetree Client
//!
//! Pipelined asynchronous client for the nodetree protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Connection                           │
//! │                                                              │
//! │  facade ──► CorrelationTables ◄── dispatch ◄── read loop     │
//! │    │        (qid/rid/mid/bid,        │                       │
//! │    │         plugin handlers)        └──► plugin tasks       │
//! │    ▼                                          │              │
//! │  outbound queue ◄─────────────────────────────┘              │
//! │    │                                                         │
//! │    └──► write loop ──► transport (tcp / tls / unix)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Four identifier spaces, each unique among outstanding operations.
//! - Subscriptions stay registered until `subscription_cancelled`.
//! - Plugin invocations run concurrently and answer exactly once.
//! - A terminated connection fails every waiter exactly once.
//!
//! ## Example
//!
//! ```no_run
//! use nodetree_client::{ClientConfig, Connection, NodeId};
//!
//! # async fn run() -> Result<(), nodetree_client::ClientError> {
//! let conn = Connection::connect("nodetree://00@localhost:4000", ClientConfig::default()).await?;
//! let root = conn.get(NodeId::ROOT).await?;
//! println!("root has {} tags", root.tags.len());
//! conn.close();
//! # Ok(())
//! # }
//! ```

pub mod connection;
mod dispatch;
pub mod domain;
pub mod facade;
pub mod plugin;
pub mod subscription;
pub mod transport;

pub use connection::{Connection, ServerInfo};
pub use domain::{
    ClientConfig, ClientError, ClientResult, ConfigError, ConnectionFailure, ConnectionState,
    FromReply, IdSpace, ListUpdate, PendingCounts, QueryKind, QueryReply, QueryRequest,
    QueryResult, StatsSnapshot, TransportError,
};
pub use facade::NewNode;
pub use plugin::PluginHandler;
pub use subscription::Subscription;
pub use transport::{AuthKey, Endpoint, Fingerprint, ServerUrl};

pub use nodetree_proto::{Check, Node, NodeId, PosFilter, RemoteError, Value};

/// Crate version, announced as the default client version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Dial `url` and complete the handshake.
pub async fn connect(url: &str, config: ClientConfig) -> ClientResult<Connection> {
    Connection::connect(url, config).await
}
