//! Fixed-length authentication credential.

use crate::domain::error::TransportError;
use std::fmt;
use zeroize::Zeroizing;

/// Length of the credential written before `connect`.
pub const AUTH_KEY_LEN: usize = 64;

/// Authentication key, right-padded with zeros to [`AUTH_KEY_LEN`] bytes.
///
/// The key material is wiped on drop and never printed.
#[derive(Clone)]
pub struct AuthKey {
    bytes: Zeroizing<[u8; AUTH_KEY_LEN]>,
}

impl AuthKey {
    /// Parse a hex key of at most `AUTH_KEY_LEN` bytes.
    pub fn from_hex(hex_key: &str) -> Result<Self, TransportError> {
        let raw = Zeroizing::new(
            hex::decode(hex_key).map_err(|e| TransportError::InvalidAuthKey(e.to_string()))?,
        );
        Self::from_bytes(&raw)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, TransportError> {
        if raw.len() > AUTH_KEY_LEN {
            return Err(TransportError::InvalidAuthKey(format!(
                "key is {} bytes, at most {} allowed",
                raw.len(),
                AUTH_KEY_LEN
            )));
        }
        let mut bytes = Zeroizing::new([0u8; AUTH_KEY_LEN]);
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self { bytes })
    }

    /// The bytes sent on the wire.
    pub fn credential(&self) -> &[u8; AUTH_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(<redacted>)")
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..] == other.bytes[..]
    }
}

impl Eq for AuthKey {}
