//! Hash-linked, proposer-signed batches of transactions.

use crate::core::transaction::Transaction;
use crate::crypto::key_pair::{CryptoError, PrivateKey, Signature, verify_with_address};
use crate::types::address::Address;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use serde::{Deserialize, Serialize};
use stakechain_derive::{BinaryCodec, Error};

const HASH_TAG: &[u8] = b"STAKECHAIN/BLOCK";

/// Bump when the block hash preimage changes.
pub const BLOCK_HASH_VERSION: u8 = 1;

/// 2017-01-01T00:00:00Z in milliseconds.
pub const GENESIS_TIMESTAMP: u64 = 1_483_228_800_000;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("signing key {actual} is not the block proposer {expected}")]
    KeyMismatch { expected: String, actual: String },
    #[error("{0}")]
    Crypto(#[from] CryptoError),
}

/// A block. `hash` is always derived from the other fields; a snapshot's
/// recorded hash is kept as-is so [`Block::is_valid_block`] can detect tampering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BinaryCodec)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub previous_hash: Hash,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub proposer: Address,
    #[serde(default)]
    pub signature: Option<Signature>,
    pub hash: Hash,
}

impl Block {
    /// Builds an unsigned block and computes its hash.
    pub fn new(
        timestamp: u64,
        transactions: Vec<Transaction>,
        previous_hash: Hash,
        proposer: Address,
    ) -> Self {
        let mut block = Self {
            previous_hash,
            timestamp,
            transactions,
            proposer,
            signature: None,
            hash: Hash::zero(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// The fixed first block of every chain.
    pub fn genesis() -> Self {
        Block::new(GENESIS_TIMESTAMP, Vec::new(), Hash::zero(), Address::genesis())
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_zero()
    }

    /// SHA-256 over tag, version, previous hash, timestamp, every
    /// transaction's full encoding (fee and signature included), and proposer.
    pub fn compute_hash(&self) -> Hash {
        let mut h = Hash::sha256();
        h.update(HASH_TAG);
        BLOCK_HASH_VERSION.encode(&mut h);
        self.previous_hash.encode(&mut h);
        self.timestamp.encode(&mut h);
        self.transactions.encode(&mut h);
        self.proposer.encode(&mut h);
        h.finalize()
    }

    pub fn sign_block(&mut self, key: &PrivateKey) -> Result<(), BlockError> {
        let signer = key.address();
        if signer != self.proposer {
            return Err(BlockError::KeyMismatch {
                expected: self.proposer.to_string(),
                actual: signer.to_string(),
            });
        }
        self.signature = Some(key.sign_digest(&self.hash)?);
        Ok(())
    }

    /// Sum of the fees of every transaction, saturating.
    pub fn total_fees(&self) -> u64 {
        self.transactions
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.fee))
    }

    /// Tamper, transaction-signature and proposer-signature checks.
    ///
    /// Never errors: any failure, including a transaction missing its
    /// signature, is reported as `false`.
    pub fn is_valid_block(&self) -> bool {
        if self.compute_hash() != self.hash {
            return false;
        }
        let transactions_valid = self
            .transactions
            .iter()
            .filter(|tx| !tx.is_system())
            .all(|tx| matches!(tx.is_valid(), Ok(true)));
        if !transactions_valid {
            return false;
        }
        match &self.signature {
            Some(signature) => verify_with_address(&self.proposer, &self.hash, signature),
            None => false,
        }
    }

    pub fn contains_transaction(&self, digest: &Hash) -> bool {
        self.transactions.iter().any(|tx| &tx.digest() == digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::signed_transfer;

    fn signed_block(key: &PrivateKey, transactions: Vec<Transaction>) -> Block {
        let mut block = Block::new(1_000, transactions, Block::genesis().hash, key.address());
        block.sign_block(key).unwrap();
        block
    }

    #[test]
    fn genesis_is_fixed() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a.hash, b.hash);
        assert!(a.previous_hash.is_zero());
        assert!(a.transactions.is_empty());
        assert_eq!(a.proposer, Address::genesis());
        assert!(a.is_genesis());
    }

    #[test]
    fn signed_block_is_valid() {
        let key = PrivateKey::new();
        let tx = signed_transfer(&PrivateKey::new(), &key.address(), 5, 1);
        assert!(signed_block(&key, vec![tx]).is_valid_block());
    }

    #[test]
    fn unsigned_block_is_invalid() {
        let block = Block::new(1, Vec::new(), Hash::zero(), PrivateKey::new().address());
        assert!(!block.is_valid_block());
    }

    #[test]
    fn sign_with_foreign_key_is_key_mismatch() {
        let mut block = Block::new(1, Vec::new(), Hash::zero(), PrivateKey::new().address());
        let result = block.sign_block(&PrivateKey::new());
        assert!(matches!(result, Err(BlockError::KeyMismatch { .. })));
    }

    #[test]
    fn tampered_amount_is_detected() {
        let key = PrivateKey::new();
        let tx = signed_transfer(&PrivateKey::new(), &key.address(), 5, 1);
        let mut block = signed_block(&key, vec![tx]);
        block.transactions[0].amount = 500;
        assert!(!block.is_valid_block());
    }

    #[test]
    fn tampered_fee_is_detected_by_block_hash() {
        let key = PrivateKey::new();
        let tx = signed_transfer(&PrivateKey::new(), &key.address(), 5, 1);
        let mut block = signed_block(&key, vec![tx]);
        block.transactions[0].fee = 0;
        assert!(!block.is_valid_block());
    }

    #[test]
    fn recomputed_hash_without_resigning_fails_signature_check() {
        let key = PrivateKey::new();
        let tx = signed_transfer(&PrivateKey::new(), &key.address(), 5, 1);
        let mut block = signed_block(&key, vec![tx]);
        block.timestamp += 1;
        block.hash = block.compute_hash();
        assert!(!block.is_valid_block());
    }

    #[test]
    fn unsigned_transaction_makes_block_invalid() {
        let key = PrivateKey::new();
        let tx = Transaction::new(PrivateKey::new().address(), key.address(), 5, 1);
        assert!(!signed_block(&key, vec![tx]).is_valid_block());
    }

    #[test]
    fn system_transactions_skip_signature_check() {
        let key = PrivateKey::new();
        let tx = Transaction::system(key.address(), 50);
        assert!(signed_block(&key, vec![tx]).is_valid_block());
    }

    #[test]
    fn json_round_trip_keeps_recorded_hash() {
        let key = PrivateKey::new();
        let block = signed_block(&key, Vec::new());
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
        assert!(back.is_valid_block());
        assert!(json.contains("\"previousHash\""));
    }

    #[test]
    fn total_fees_sums_transactions() {
        let key = PrivateKey::new();
        let sender = PrivateKey::new();
        let txs = vec![
            signed_transfer(&sender, &key.address(), 5, 2),
            signed_transfer(&sender, &key.address(), 6, 3),
        ];
        assert_eq!(signed_block(&key, txs).total_fees(), 5);
    }
}
