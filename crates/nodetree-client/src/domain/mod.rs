//! Domain layer: correlation state and its invariants, free of I/O.

pub mod config;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod pending;
pub mod reply;
pub mod stats;

pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult, ConnectionFailure, TransportError};
pub use ids::{IdAllocator, IdSpace};
pub use lifecycle::{Activation, ConnectionState, Lifecycle};
pub use pending::{CorrelationTables, Delivery, Drained, OpenSubscription, PendingCounts, QueryState};
pub use reply::{FromReply, ListUpdate, QueryKind, QueryReply, QueryRequest, QueryResult};
pub use stats::{ConnectionStats, StatsSnapshot};
