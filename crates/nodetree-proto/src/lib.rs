//! # Nodetree Proto
//!
//! Wire-level vocabulary of the nodetree protocol: the node model, the
//! closed [`Message`] taxonomy and the msgpack stream codec.
//!
//! ## Wire Format
//!
//! ```text
//! ┌─────────────┬──────────────────────────────┬──────────────┬─────┐
//! │ auth key    │ msgpack map (connect)        │ msgpack map  │ ... │
//! │ 64 bytes    │ {object_type: "connect", ..} │ {..}         │     │
//! └─────────────┴──────────────────────────────┴──────────────┴─────┘
//! ```
//!
//! Every record after the credential is a self-delimiting msgpack map
//! whose `object_type` field names the message.

pub mod codec;
pub mod errors;
pub mod messages;
pub mod node;

pub use codec::{encode, CodecError, FrameDecoder};
pub use errors::{codes, Check, RemoteError};
pub use messages::{Bid, Correlation, Message, Mid, Phid, Qid, Rid};
pub use node::{Node, NodeId, NodeIdError, PosFilter, Value, NODE_ID_LEN};

/// Protocol version announced in the `connect` handshake.
pub const PROTO_VERSION: u16 = 1;

/// Default upper bound on a single encoded record.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
