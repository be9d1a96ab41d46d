//! Deterministic version keys for implementation bytecode.
//!
//! A [`VersionKey`] identifies one implementation build. It is derived from
//! both the unlinked creation bytecode (link placeholders intact) and the
//! fully linked bytecode: the same source linked against different libraries
//! yields different runtime code and must not collide in the deployment
//! cache.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

/// Deduplication key for implementation deployments.
///
/// Referentially transparent: the same (unlinked, linked) byte pair always
/// produces the same key, and a change to either input changes the key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionKey([u8; 32]);

impl VersionKey {
    /// Derives the key for an implementation from its unlinked and linked
    /// creation bytecode.
    ///
    /// Each input is hashed independently before the digests are combined,
    /// so the pair ("ab", "c") can never collide with ("a", "bc").
    pub fn of(unlinked: &[u8], linked: &[u8]) -> Self {
        let unlinked_digest = Keccak256::digest(unlinked);
        let linked_digest = Keccak256::digest(linked);

        let mut hasher = Keccak256::new();
        hasher.update(unlinked_digest);
        hasher.update(linked_digest);
        Self(hasher.finalize().into())
    }

    /// Raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form without the 0x prefix, used as the manifest map key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the hex form produced by [`VersionKey::to_hex`].
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).ok()?;
        let digest: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(digest))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for VersionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VersionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionKey::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid version key: {}", s)))
    }
}
