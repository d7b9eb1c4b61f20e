//! Account and proposer addresses.

use serde::{Deserialize, Serialize};
use stakechain_derive::BinaryCodec;
use std::fmt;

/// Opaque account identifier: lowercase hex of an uncompressed secp256k1
/// public key, or a reserved name such as [`Address::genesis`].
///
/// Equality is exact string comparison.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, BinaryCodec,
)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Address(value.into())
    }

    /// Proposer recorded on the genesis block.
    pub fn genesis() -> Self {
        Address("genesis".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address::new(value)
    }
}
