//! Client error taxonomy.
//!
//! Three layers, from widest to narrowest blast radius:
//!
//! - [`ConnectionFailure`]: the connection is gone. Delivered (cloned) to
//!   every outstanding waiter and to every later call.
//! - [`TransportError`]: dialing or URL problems before a connection exists.
//! - [`ClientError`]: what a single facade call returns. Domain errors
//!   (`Remote`, `Query`) affect only the one caller they answer.

use crate::domain::config::ConfigError;
use crate::domain::ids::IdSpace;
use nodetree_proto::{Check, CodecError, RemoteError};
use thiserror::Error;

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionFailure {
    /// The byte stream ended or a read/write failed.
    #[error("transport lost: {0}")]
    TransportLost(String),

    /// The server answered the handshake with `connection_error`.
    #[error("connection rejected by server: {0}")]
    Rejected(RemoteError),

    /// The server reported a malformed packet (`proto_error`).
    #[error("server reported protocol error: {0}")]
    PeerProtocolError(RemoteError),

    /// The server sent something that cannot be correlated or is out of
    /// sequence.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An inbound record could not be decoded.
    #[error("decode failed: {0}")]
    Codec(CodecError),

    /// `connected` did not arrive in time.
    #[error("handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    /// Shut down by the caller.
    #[error("connection closed")]
    Closed,
}

impl ConnectionFailure {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionFailure::TransportLost(_) => "transport_lost",
            ConnectionFailure::Rejected(_) => "rejected",
            ConnectionFailure::PeerProtocolError(_) => "peer_protocol_error",
            ConnectionFailure::ProtocolViolation(_) => "protocol_violation",
            ConnectionFailure::Codec(_) => "codec",
            ConnectionFailure::HandshakeTimeout(_) => "handshake_timeout",
            ConnectionFailure::Closed => "closed",
        }
    }
}

impl From<CodecError> for ConnectionFailure {
    fn from(err: CodecError) -> Self {
        ConnectionFailure::Codec(err)
    }
}

/// Errors establishing the byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid auth key: {0}")]
    InvalidAuthKey(String),

    #[error("invalid certificate fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("tls url requires a certificate fingerprint")]
    MissingFingerprint,

    #[error("certificate fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("tls support is not compiled in")]
    TlsDisabled,

    #[error("local sockets are not supported on this platform")]
    UnixUnsupported,

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Error returned by a client call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The connection failed or was closed.
    #[error(transparent)]
    Connection(#[from] ConnectionFailure),

    /// The server (or a remote plugin) rejected the operation.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The server rejected a query; `checks` explain what it looked at.
    #[error("query error: {error}")]
    Query {
        error: RemoteError,
        checks: Vec<Check>,
    },

    /// The caller asked for an id that is still outstanding.
    #[error("{space} id {id} is already in use")]
    IdInUse { space: IdSpace, id: u64 },

    /// No subscription is bound to this qid.
    #[error("no active subscription for qid {0}")]
    NotSubscribed(u64),

    /// A reply of the wrong shape reached a typed call.
    #[error("expected {expected} reply, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: &'static str,
    },

    /// An outbound message could not be encoded.
    #[error("encode failed: {0}")]
    Codec(CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether the error ended the connection (as opposed to one call).
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }

    /// Remote error code, for domain errors.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            ClientError::Remote(err) | ClientError::Query { error: err, .. } => Some(&err.code),
            _ => None,
        }
    }
}

/// Result alias for client calls.
pub type ClientResult<T> = Result<T, ClientError>;
