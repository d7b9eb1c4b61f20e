//! Builders shared by unit tests.

use crate::core::block::GENESIS_TIMESTAMP;
use crate::core::ledger::{Ledger, LedgerRules};
use crate::core::transaction::Transaction;
use crate::crypto::key_pair::PrivateKey;
use crate::types::address::Address;
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Signed transfer with a unique timestamp so digests never collide.
pub fn signed_transfer(key: &PrivateKey, to: &Address, amount: u64, fee: u64) -> Transaction {
    let timestamp = 1_000_000 + COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut tx = Transaction::new(key.address(), to.clone(), amount, fee).with_timestamp(timestamp);
    tx.sign(key).unwrap();
    tx
}

/// Genesis-only ledger with the given accounts pre-funded.
pub fn funded_ledger(balances: &[(&PrivateKey, u64)]) -> Ledger {
    let mut ledger = Ledger::new(LedgerRules::default());
    for (key, balance) in balances {
        ledger.create_account(&key.address(), *balance);
    }
    ledger
}

/// Ledger of `blocks` empty blocks on top of genesis, proposed by `key`, one
/// per 10s slot after the genesis slot.
pub fn ledger_with_blocks(key: &PrivateKey, blocks: u64) -> Ledger {
    let mut ledger = Ledger::new(LedgerRules::default());
    for i in 1..=blocks {
        let timestamp = GENESIS_TIMESTAMP + i * 10_000;
        let block = ledger.build_block(Vec::new(), key, timestamp).unwrap();
        ledger.accept_block(block).unwrap();
    }
    ledger
}
