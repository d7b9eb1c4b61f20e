//! 32-byte SHA-256 digest type.

use crate::types::encoding::EncodeSink;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use stakechain_derive::BinaryCodec;
use std::fmt;
use std::str::FromStr;

pub const HASH_LEN: usize = 32;

/// SHA-256 output. `Copy`, since it is passed by value all over validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BinaryCodec)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// All-zero hash, the genesis block's parent.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Starts an incremental SHA-256 computation.
    pub fn sha256() -> HashBuilder {
        HashBuilder::new()
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    /// Parses 64 hex characters. `"0"` is accepted as the zero hash, which is
    /// how the genesis parent appears in persisted snapshots.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "0" {
            return Ok(Hash::zero());
        }
        let mut out = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Hash(out))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_zero() {
            serializer.serialize_str("0")
        } else {
            serializer.serialize_str(&self.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256; doubles as an [`EncodeSink`] so values can be
/// hashed without an intermediate buffer.
pub struct HashBuilder {
    hasher: Sha256,
}

impl HashBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        let mut h = Hash::sha256();
        h.update(b"abc");
        assert_eq!(
            h.finalize().to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn incremental_updates_equal_single_update() {
        let mut a = Hash::sha256();
        a.update(b"hello ");
        a.update(b"world");
        let mut b = Hash::sha256();
        b.update(b"hello world");
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn zero_hash_serializes_as_genesis_sentinel() {
        let json = serde_json::to_string(&Hash::zero()).unwrap();
        assert_eq!(json, "\"0\"");
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert!(back.is_zero());
    }

    #[test]
    fn json_uses_lowercase_hex() {
        let mut h = Hash::sha256();
        h.update(b"x");
        let hash = h.finalize();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash));
        assert_eq!(serde_json::from_str::<Hash>(&json).unwrap(), hash);
    }

    #[test]
    fn from_str_rejects_wrong_length() {
        assert!("abcd".parse::<Hash>().is_err());
    }
}
