//! Signed value transfers.
//!
//! A transaction's identity is its [`digest`](Transaction::digest): SHA-256 over a
//! versioned encoding of sender, recipient, amount, timestamp and message.
//! Block and chain hashes depend on it transitively, so the layout below is
//! frozen per [`DIGEST_VERSION`].

use crate::crypto::key_pair::{CryptoError, PrivateKey, Signature, verify_with_address};
use crate::types::address::Address;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use crate::utils::now_millis;
use serde::{Deserialize, Serialize};
use stakechain_derive::{BinaryCodec, Error};

/// Domain tag prefixed to every transaction digest.
const DIGEST_TAG: &[u8] = b"STAKECHAIN/TX";

/// Bump when the digest field set or order changes.
pub const DIGEST_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("signing key {actual} does not own sender address {expected}")]
    KeyMismatch { expected: String, actual: String },
    #[error("system transactions cannot be signed")]
    SystemTransaction,
    #[error("transaction has no signature")]
    MissingSignature,
    #[error("{0}")]
    Crypto(#[from] CryptoError),
}

/// A value transfer from `from_address` to `to_address`.
///
/// `from_address == None` marks a system transaction, which carries no
/// signature and is exempt from signature checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BinaryCodec)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub from_address: Option<Address>,
    pub to_address: Address,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub signature: Option<Signature>,
}

impl Transaction {
    /// Unsigned transfer stamped with the current time.
    pub fn new(from: Address, to: Address, amount: u64, fee: u64) -> Self {
        Self {
            from_address: Some(from),
            to_address: to,
            amount,
            fee,
            timestamp: now_millis(),
            message: None,
            signature: None,
        }
    }

    /// Transfer minted by the protocol itself.
    pub fn system(to: Address, amount: u64) -> Self {
        Self {
            from_address: None,
            to_address: to,
            amount,
            fee: 0,
            timestamp: now_millis(),
            message: None,
            signature: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_system(&self) -> bool {
        self.from_address.is_none()
    }

    /// Amount plus fee, or `None` on overflow.
    pub fn total_cost(&self) -> Option<u64> {
        self.amount.checked_add(self.fee)
    }

    /// Canonical digest (v1): tag, version, from, to, amount, timestamp, message.
    ///
    /// Absent sender and absent message are both encoded as the empty string.
    /// The fee and signature are not covered.
    pub fn digest(&self) -> Hash {
        let mut h = Hash::sha256();
        h.update(DIGEST_TAG);
        DIGEST_VERSION.encode(&mut h);
        self.from_address
            .as_ref()
            .map_or("", Address::as_str)
            .encode(&mut h);
        self.to_address.as_str().encode(&mut h);
        self.amount.encode(&mut h);
        self.timestamp.encode(&mut h);
        self.message.as_deref().unwrap_or("").encode(&mut h);
        h.finalize()
    }

    /// Signs the digest with `key`, which must own `from_address`.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), TransactionError> {
        let from = self
            .from_address
            .as_ref()
            .ok_or(TransactionError::SystemTransaction)?;
        let signer = key.address();
        if &signer != from {
            return Err(TransactionError::KeyMismatch {
                expected: from.to_string(),
                actual: signer.to_string(),
            });
        }
        self.signature = Some(key.sign_digest(&self.digest())?);
        Ok(())
    }

    /// `Ok(true)` for system transactions and good signatures, `Ok(false)` for
    /// signatures that do not verify. Only a missing signature is an error.
    pub fn is_valid(&self) -> Result<bool, TransactionError> {
        let Some(from) = &self.from_address else {
            return Ok(true);
        };
        let signature = self
            .signature
            .as_ref()
            .ok_or(TransactionError::MissingSignature)?;
        Ok(verify_with_address(from, &self.digest(), signature))
    }
}
