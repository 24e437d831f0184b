//! SHA-256 certificate fingerprints.

use crate::domain::error::TransportError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// SHA-256 digest of a DER-encoded certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a DER certificate.
    pub fn of_der(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = TransportError;

    /// Hex, case-insensitive; `:` separators (raw or percent-encoded) are
    /// ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .replace("%3A", "")
            .replace("%3a", "")
            .chars()
            .filter(|c| *c != ':')
            .collect();
        let raw = hex::decode(cleaned.to_ascii_lowercase())
            .map_err(|e| TransportError::InvalidFingerprint(e.to_string()))?;
        let bytes: [u8; 32] = raw.try_into().map_err(|raw: Vec<u8>| {
            TransportError::InvalidFingerprint(format!("expected 32 bytes, got {}", raw.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}
