//! Pending transactions grouped into fixed-size batches.
//!
//! A batch becomes eligible for block assembly once it holds `batch_size`
//! transactions. Confirmed transactions are removed by digest when a block is
//! accepted, and batches left empty are pruned.

use crate::core::block::Block;
use crate::core::ledger::Ledger;
use crate::core::transaction::Transaction;
use crate::types::address::Address;
use crate::types::hash::Hash;
use stakechain_derive::Error;
use std::collections::HashMap;

/// Default number of transactions per batch.
pub const BATCH_SIZE: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("system transactions are not accepted from the network")]
    SystemTransaction,
    #[error("transfers to {master} must carry exactly {expected}, got {actual}")]
    InvalidIdentityFee {
        master: Address,
        expected: u64,
        actual: u64,
    },
    #[error("sender {0} is banned")]
    BannedSender(Address),
    #[error("fee {fee} is below the minimum {minimum}")]
    InsufficientFee { fee: u64, minimum: u64 },
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("signature is missing or does not verify")]
    InvalidSignature,
    #[error("sender {address} holds {balance}, needs {required}")]
    InsufficientFunds {
        address: Address,
        balance: u64,
        required: u64,
    },
    #[error("transaction {0} is already pending or confirmed")]
    DuplicateTransaction(Hash),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MempoolBatch {
    pub id: u64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug)]
pub struct Mempool {
    batches: Vec<MempoolBatch>,
    /// Digest to owning batch id.
    index: HashMap<Hash, u64>,
    batch_size: usize,
    next_id: u64,
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new(BATCH_SIZE)
    }
}

impl Mempool {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batches: Vec::new(),
            index: HashMap::new(),
            batch_size: batch_size.max(1),
            next_id: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn contains(&self, digest: &Hash) -> bool {
        self.index.contains_key(digest)
    }

    /// Pending transaction count across all batches.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn batches(&self) -> &[MempoolBatch] {
        &self.batches
    }

    /// Appends to the first batch with room, opening a new batch if needed.
    /// Returns `false` if a transaction with the same digest is already pending.
    pub fn append(&mut self, tx: Transaction) -> bool {
        let digest = tx.digest();
        if self.index.contains_key(&digest) {
            return false;
        }
        let batch_size = self.batch_size;
        let id = match self
            .batches
            .iter_mut()
            .find(|batch| batch.transactions.len() < batch_size)
        {
            Some(batch) => {
                batch.transactions.push(tx);
                batch.id
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.batches.push(MempoolBatch {
                    id,
                    transactions: vec![tx],
                });
                id
            }
        };
        self.index.insert(digest, id);
        true
    }

    /// Runs the admission rules against `ledger` and appends on success.
    ///
    /// A sender that cannot cover `amount + fee` is banned as a side effect.
    pub fn admit(
        &mut self,
        tx: Transaction,
        ledger: &mut Ledger,
        min_fee: u64,
    ) -> Result<Hash, AdmissionError> {
        let Some(from) = tx.from_address.clone() else {
            return Err(AdmissionError::SystemTransaction);
        };
        let rules = ledger.rules();
        if tx.to_address == rules.master_address && tx.amount != rules.identity_fee {
            return Err(AdmissionError::InvalidIdentityFee {
                master: rules.master_address.clone(),
                expected: rules.identity_fee,
                actual: tx.amount,
            });
        }
        if ledger.is_address_banned(&from) {
            return Err(AdmissionError::BannedSender(from));
        }
        if tx.fee < min_fee {
            return Err(AdmissionError::InsufficientFee {
                fee: tx.fee,
                minimum: min_fee,
            });
        }
        if tx.amount == 0 {
            return Err(AdmissionError::ZeroAmount);
        }
        if !matches!(tx.is_valid(), Ok(true)) {
            return Err(AdmissionError::InvalidSignature);
        }
        let digest = tx.digest();
        if ledger.is_transaction_confirmed(&digest) {
            return Err(AdmissionError::DuplicateTransaction(digest));
        }
        let balance = ledger.balance(&from);
        let required = tx.total_cost().unwrap_or(u64::MAX);
        if balance < required {
            ledger.ban_address(from.clone());
            return Err(AdmissionError::InsufficientFunds {
                address: from,
                balance,
                required,
            });
        }
        if !self.append(tx) {
            return Err(AdmissionError::DuplicateTransaction(digest));
        }
        Ok(digest)
    }

    /// First batch that reached `batch_size`.
    pub fn full_batch(&self) -> Option<&MempoolBatch> {
        self.batches
            .iter()
            .find(|batch| batch.transactions.len() >= self.batch_size)
    }

    pub fn has_full_batch(&self) -> bool {
        self.full_batch().is_some()
    }

    /// Drops every pending transaction included in `block` and prunes empty
    /// batches. Returns how many were removed.
    pub fn remove_confirmed(&mut self, block: &Block) -> usize {
        let mut removed = 0;
        for tx in &block.transactions {
            if self.index.remove(&tx.digest()).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            let index = &self.index;
            for batch in &mut self.batches {
                batch.transactions.retain(|tx| index.contains_key(&tx.digest()));
            }
            self.batches.retain(|batch| !batch.transactions.is_empty());
        }
        removed
    }

    pub fn find(&self, digest: &Hash) -> Option<&Transaction> {
        let id = self.index.get(digest)?;
        self.batches
            .iter()
            .find(|batch| batch.id == *id)?
            .transactions
            .iter()
            .find(|tx| &tx.digest() == digest)
    }

    pub fn flush(&mut self) {
        self.batches.clear();
        self.index.clear();
    }
}
