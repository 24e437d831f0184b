//! # Stream Codec
//!
//! Messages are self-delimiting msgpack maps written back to back on the
//! byte stream. Decoding is split in two stages:
//!
//! 1. Find the record boundary by reading one raw msgpack value. A
//!    truncated record is the "need more bytes" state, not an error.
//! 2. Map the raw value onto [`Message`]. Failures here are schema errors.

use crate::messages::Message;
use crate::DEFAULT_MAX_MESSAGE_SIZE;
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use thiserror::Error;
use tracing::trace;

/// Codec failures. None of these mean "need more bytes".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Message could not be serialized.
    #[error("failed to encode {tag}: {reason}")]
    Encode { tag: &'static str, reason: String },

    /// Bytes are not valid msgpack.
    #[error("malformed msgpack: {0}")]
    Malformed(String),

    /// A complete record did not match any known message layout.
    #[error("schema error: {0}")]
    Schema(String),

    /// A record grew past the configured size limit.
    #[error("message of at least {size} bytes exceeds limit of {limit} bytes")]
    Oversized { size: usize, limit: usize },
}

/// Serialize a message to its wire bytes.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    rmp_serde::to_vec_named(msg).map_err(|e| CodecError::Encode {
        tag: msg.tag(),
        reason: e.to_string(),
    })
}

/// Incremental decoder over an inbound byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    /// Decoder with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Decoder rejecting records larger than `max_message_size` bytes.
    #[must_use]
    pub fn with_limit(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_size,
        }
    }

    /// Append freshly received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a complete record.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete message.
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial record.
    pub fn decode_next(&mut self) -> Result<Option<Message>, CodecError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        let raw = match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => value,
            Err(e) if is_truncation(&e) => {
                if self.buffer.len() > self.max_message_size {
                    return Err(CodecError::Oversized {
                        size: self.buffer.len(),
                        limit: self.max_message_size,
                    });
                }
                return Ok(None);
            }
            Err(e) => return Err(CodecError::Malformed(e.to_string())),
        };

        let consumed = usize::try_from(cursor.position()).unwrap_or(self.buffer.len());
        if consumed > self.max_message_size {
            return Err(CodecError::Oversized {
                size: consumed,
                limit: self.max_message_size,
            });
        }
        self.buffer.advance(consumed);
        trace!(consumed, remaining = self.buffer.len(), "Decoded record");

        rmpv::ext::from_value::<Message>(raw)
            .map(Some)
            .map_err(|e| CodecError::Schema(e.to_string()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_truncation(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(e) | rmpv::decode::Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}
