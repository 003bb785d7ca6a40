//! Content digests.
//!
//! A [`Digest`] is a BLAKE3 hash of an asset's identity plus its content
//! bytes. Hashing the identity too means a file moved between packages (or
//! renamed) digests differently even when its bytes are unchanged.

use crate::AssetId;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A fixed-size content digest (BLAKE3, 32 bytes).
///
/// Serialized as a lowercase hex string so the persisted graph stays
/// self-describing and diffable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest an asset's identity and content together.
    pub fn compute(id: &AssetId, content: &[u8]) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(id.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(content);
        Digest(*hasher.finalize().as_bytes())
    }

    /// Combine an ordered sequence of labeled digests into one digest.
    ///
    /// Callers must pass entries in a deterministic order; the combination
    /// is order-sensitive by design.
    pub fn combine<'a>(entries: impl IntoIterator<Item = (&'a AssetId, &'a [u8])>) -> Digest {
        let mut hasher = blake3::Hasher::new();
        for (id, bytes) in entries {
            hasher.update(id.to_string().as_bytes());
            hasher.update(b"\0");
            hasher.update(bytes);
            hasher.update(b"\0");
        }
        Digest(*hasher.finalize().as_bytes())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64-character lowercase hex string.
    pub fn from_hex(hex: &str) -> Option<Digest> {
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Digest(bytes))
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Digest::from_hex(&hex)
            .ok_or_else(|| D::Error::custom(format!("invalid digest hex: {hex}")))
    }
}
