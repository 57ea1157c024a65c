use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const FINGERPRINT_LEN: usize = 32;

/// SHA-256 digest of a file's bytes. Travels as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("invalid hex in fingerprint: {0}")]
    InvalidHex(String),
    #[error("invalid fingerprint length: expected {FINGERPRINT_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, FingerprintError> {
        let raw = hex::decode(s.trim()).map_err(|e| FingerprintError::InvalidHex(e.to_string()))?;
        if raw.len() != FINGERPRINT_LEN {
            return Err(FingerprintError::InvalidLength(raw.len()));
        }
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Fingerprint an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Fingerprint::from_digest(&hasher.finalize())
}
