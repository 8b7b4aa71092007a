//! Common types used across the council engines.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::sync::atomic::{AtomicU64, Ordering};

/// A 256-bit hash value (SHA3-256).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Create a zero hash.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Hash arbitrary bytes with SHA3-256.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash256 {
    fn default() -> Self {
        Self::zero()
    }
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique identifier carrying the given prefix.
///
/// Shape: `{prefix}_{unix_millis}_{sequence}{random}`. The sequence makes ids
/// distinct even when many are minted within the same millisecond.
pub fn unique_id(prefix: &str) -> String {
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{:x}{}",
        prefix,
        now().timestamp_millis(),
        seq,
        &random[..6]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_hash256_zero() {
        let hash = Hash256::zero();
        assert_eq!(hash.0, [0u8; 32]);
    }

    #[test]
    fn test_hash256_hex_roundtrip() {
        let hash = Hash256::digest(b"petition");
        let parsed = Hash256::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(Hash256::digest(b"a"), Hash256::digest(b"a"));
        assert_ne!(Hash256::digest(b"a"), Hash256::digest(b"b"));
        assert_eq!(format!("{}", Hash256::digest(b"a")).len(), 64);
    }

    #[test]
    fn test_unique_id_prefix_and_uniqueness() {
        let ids: HashSet<String> = (0..500).map(|_| unique_id("gq")).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("gq_")));
    }
}
