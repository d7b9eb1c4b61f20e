//! Account-balance state machine and the chain it is derived from.
//!
//! A [`Ledger`] is plain data with `&mut self` mutators; the node wraps it in a
//! single async mutex so every check-then-mutate sequence (transfer, block
//! acceptance, reward minting, snapshot load) runs exclusively.

use crate::core::account::Account;
use crate::core::block::{Block, BlockError};
use crate::core::transaction::Transaction;
use crate::crypto::key_pair::PrivateKey;
use crate::types::address::Address;
use crate::types::hash::Hash;
use serde::{Deserialize, Serialize};
use stakechain_derive::Error;
use std::collections::{BTreeMap, BTreeSet};

/// Hard cap on minted supply, in base units.
pub const TOTAL_SUPPLY: u64 = 21_000_000;
/// Reward for blocks before the first halving.
pub const BASE_REWARD: u64 = 50;
/// Blocks between reward halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("block {hash} links to {previous}, but the head is {head}")]
    InvalidChainLink {
        hash: Hash,
        previous: Hash,
        head: Hash,
    },
    #[error("block {0} failed validation")]
    InvalidBlock(Hash),
    #[error("proposer {0} is not a verified identity")]
    UnverifiedProposer(Address),
    #[error("allocation of {requested} would exceed the supply cap ({available} left)")]
    SupplyExceeded { requested: u64, available: u64 },
    #[error("genesis can only be seeded on an empty chain (height {0})")]
    ChainNotEmpty(u64),
    #[error("persisted state failed validation")]
    MalformedPersistedState,
    #[error("{0}")]
    Block(#[from] BlockError),
}

/// Node-configured rules the ledger applies while replaying blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerRules {
    /// Recipient of identity registration fees.
    pub master_address: Address,
    /// Exact amount a registration transfer must carry.
    pub identity_fee: u64,
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self {
            master_address: Address::new("master"),
            identity_fee: 10,
        }
    }
}

impl LedgerRules {
    fn is_registration(&self, tx: &Transaction) -> bool {
        !tx.is_system() && tx.to_address == self.master_address && tx.amount == self.identity_fee
    }
}

/// Persisted snapshot: `{ chain, accounts, bannedAddresses, currentSupply }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    pub chain: Vec<Block>,
    pub accounts: BTreeMap<Address, Account>,
    pub banned_addresses: Vec<Address>,
    pub current_supply: u64,
}

impl LedgerState {
    pub fn is_chain_valid(&self) -> bool {
        is_chain_valid(&self.chain)
    }

    /// Chain checks plus the supply cap. Every state received from a peer or
    /// read from disk must pass this before it is loaded.
    pub fn is_valid(&self) -> bool {
        self.current_supply <= TOTAL_SUPPLY && self.is_chain_valid()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// Validates an untrusted chain: genesis parent sentinel, hash links, and
/// every block's own checks. An empty chain is invalid.
pub fn is_chain_valid(chain: &[Block]) -> bool {
    let Some(first) = chain.first() else {
        return false;
    };
    if !first.previous_hash.is_zero() {
        return false;
    }
    chain
        .windows(2)
        .all(|pair| pair[1].previous_hash == pair[0].hash && pair[1].is_valid_block())
}

/// Result of applying a block's transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReceipt {
    pub applied: usize,
    /// Digests of transactions that could not be applied; their fees are not collected.
    pub skipped: Vec<Hash>,
    pub fees: u64,
    pub reward_minted: bool,
}

/// Where a transaction was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLocation {
    pub block_index: usize,
    pub block_hash: Hash,
    pub confirmations: usize,
    pub transaction: Transaction,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    accounts: BTreeMap<Address, Account>,
    chain: Vec<Block>,
    banned: BTreeSet<Address>,
    verified: BTreeSet<Address>,
    /// Digests of every transaction included in `chain`.
    confirmed: BTreeSet<Hash>,
    current_supply: u64,
    rules: LedgerRules,
}

impl Ledger {
    /// Ledger holding only the genesis block.
    pub fn new(rules: LedgerRules) -> Self {
        Self {
            accounts: BTreeMap::new(),
            chain: vec![Block::genesis()],
            banned: BTreeSet::new(),
            verified: BTreeSet::new(),
            confirmed: BTreeSet::new(),
            current_supply: 0,
            rules,
        }
    }

    pub fn rules(&self) -> &LedgerRules {
        &self.rules
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn latest_block(&self) -> &Block {
        // The chain always holds at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    /// Blocks after genesis.
    pub fn height(&self) -> u64 {
        (self.chain.len() - 1) as u64
    }

    pub fn current_supply(&self) -> u64 {
        self.current_supply
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |a| a.balance)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Returns the account for `address`, inserting it with `initial_balance`
    /// only if it does not exist yet.
    pub fn create_account(&mut self, address: &Address, initial_balance: u64) -> &Account {
        self.accounts
            .entry(address.clone())
            .or_insert_with(|| Account::new(address.clone(), initial_balance))
    }

    fn credit(&mut self, address: &Address, amount: u64) {
        let account = self
            .accounts
            .entry(address.clone())
            .or_insert_with(|| Account::new(address.clone(), 0));
        account.balance = account.balance.saturating_add(amount);
    }

    /// Moves `amount` to the recipient and burns nothing: the fee is debited
    /// here and paid out later through [`Ledger::mint_block_reward`].
    ///
    /// Returns `false` with no mutation if the sender is missing, is a system
    /// sender, or cannot cover `amount + fee`.
    pub fn process_transaction(&mut self, tx: &Transaction) -> bool {
        let Some(from) = &tx.from_address else {
            return false;
        };
        let Some(cost) = tx.total_cost() else {
            return false;
        };
        match self.accounts.get_mut(from) {
            Some(sender) if sender.can_afford(cost) => {
                sender.balance -= cost;
                sender.nonce += 1;
            }
            _ => return false,
        }
        self.credit(&tx.to_address, tx.amount);
        true
    }

    /// `BASE_REWARD` halved once per `HALVING_INTERVAL` blocks of height.
    pub fn current_block_reward(&self) -> u64 {
        let halvings = self.height() / HALVING_INTERVAL;
        if halvings >= u64::BITS as u64 {
            0
        } else {
            BASE_REWARD >> halvings
        }
    }

    /// Pays `reward + fees` to `proposer`. If the reward would push supply past
    /// [`TOTAL_SUPPLY`], only the fees are paid and `false` is returned.
    pub fn mint_block_reward(&mut self, proposer: &Address, fees: u64) -> bool {
        let reward = self.current_block_reward();
        let within_cap = self
            .current_supply
            .checked_add(reward)
            .is_some_and(|total| total <= TOTAL_SUPPLY);
        if !within_cap {
            self.credit(proposer, fees);
            return false;
        }
        self.credit(proposer, reward.saturating_add(fees));
        self.current_supply += reward;
        true
    }

    pub fn is_chain_valid(&self) -> bool {
        is_chain_valid(&self.chain)
    }

    /// Validates `block` against the head, applies its transactions in order,
    /// appends it and pays the proposer.
    ///
    /// Transactions that cannot be applied are skipped and their fees are not
    /// collected, as are transactions whose digest is already on the chain or
    /// earlier in the same block. Accepted registration transfers verify their
    /// sender.
    pub fn accept_block(&mut self, block: Block) -> Result<BlockReceipt, LedgerError> {
        let head = self.latest_block().hash;
        if block.previous_hash != head {
            return Err(LedgerError::InvalidChainLink {
                hash: block.hash,
                previous: block.previous_hash,
                head,
            });
        }
        if !block.is_valid_block() {
            return Err(LedgerError::InvalidBlock(block.hash));
        }

        let mut receipt = BlockReceipt {
            applied: 0,
            skipped: Vec::new(),
            fees: 0,
            reward_minted: false,
        };
        for tx in &block.transactions {
            let digest = tx.digest();
            if !self.confirmed.insert(digest) {
                receipt.skipped.push(digest);
                continue;
            }
            if self.process_transaction(tx) {
                receipt.applied += 1;
                receipt.fees = receipt.fees.saturating_add(tx.fee);
                if self.rules.is_registration(tx) {
                    if let Some(from) = &tx.from_address {
                        self.verified.insert(from.clone());
                    }
                }
            } else {
                receipt.skipped.push(digest);
            }
        }

        let proposer = block.proposer.clone();
        self.chain.push(block);
        receipt.reward_minted = self.mint_block_reward(&proposer, receipt.fees);
        Ok(receipt)
    }

    /// Builds, signs and accepts a block from a verified proposer.
    pub fn propose_block(
        &mut self,
        transactions: Vec<Transaction>,
        key: &PrivateKey,
        timestamp: u64,
    ) -> Result<Block, LedgerError> {
        let proposer = key.address();
        if !self.is_identity_verified(&proposer) {
            return Err(LedgerError::UnverifiedProposer(proposer));
        }
        let block = self.build_block(transactions, key, timestamp)?;
        self.accept_block(block.clone())?;
        Ok(block)
    }

    /// Signed block on top of the current head; does not touch state.
    pub fn build_block(
        &self,
        transactions: Vec<Transaction>,
        key: &PrivateKey,
        timestamp: u64,
    ) -> Result<Block, LedgerError> {
        let mut block = Block::new(
            timestamp,
            transactions,
            self.latest_block().hash,
            key.address(),
        );
        block.sign_block(key)?;
        Ok(block)
    }

    /// Credits an initial distribution on a chain that holds only genesis.
    pub fn seed_genesis(&mut self, distribution: &[(Address, u64)]) -> Result<(), LedgerError> {
        if self.height() > 0 {
            return Err(LedgerError::ChainNotEmpty(self.height()));
        }
        let requested = distribution
            .iter()
            .fold(0u64, |acc, (_, amount)| acc.saturating_add(*amount));
        let available = TOTAL_SUPPLY.saturating_sub(self.current_supply);
        if requested > available {
            return Err(LedgerError::SupplyExceeded {
                requested,
                available,
            });
        }
        for (address, amount) in distribution {
            self.credit(address, *amount);
        }
        self.current_supply += requested;
        Ok(())
    }

    pub fn find_transaction(&self, digest: &Hash) -> Option<TransactionLocation> {
        self.chain.iter().enumerate().find_map(|(index, block)| {
            block
                .transactions
                .iter()
                .find(|tx| &tx.digest() == digest)
                .map(|tx| TransactionLocation {
                    block_index: index,
                    block_hash: block.hash,
                    confirmations: self.chain.len() - index,
                    transaction: tx.clone(),
                })
        })
    }

    /// Whether a transaction with this digest is already on the chain.
    pub fn is_transaction_confirmed(&self, digest: &Hash) -> bool {
        self.confirmed.contains(digest)
    }

    pub fn add_verified_identity(&mut self, address: Address) {
        self.verified.insert(address);
    }

    pub fn is_identity_verified(&self, address: &Address) -> bool {
        self.verified.contains(address)
    }

    /// Verified identities in lexicographic order.
    pub fn verified_identities(&self) -> impl Iterator<Item = &Address> {
        self.verified.iter()
    }

    pub fn ban_address(&mut self, address: Address) {
        self.banned.insert(address);
    }

    pub fn is_address_banned(&self, address: &Address) -> bool {
        self.banned.contains(address)
    }

    pub fn serialize_state(&self) -> LedgerState {
        LedgerState {
            chain: self.chain.clone(),
            accounts: self.accounts.clone(),
            banned_addresses: self.banned.iter().cloned().collect(),
            current_supply: self.current_supply,
        }
    }

    /// Replaces chain, accounts, bans and supply with `state`.
    ///
    /// Blocks keep the hashes and signatures recorded in the snapshot so that a
    /// later [`Ledger::is_chain_valid`] checks what was actually persisted.
    /// Verified identities are kept and extended with every registration
    /// found in the new chain. An empty chain or a supply above
    /// [`TOTAL_SUPPLY`] is rejected.
    pub fn load_state(&mut self, state: LedgerState) -> Result<(), LedgerError> {
        if state.chain.is_empty() || state.current_supply > TOTAL_SUPPLY {
            return Err(LedgerError::MalformedPersistedState);
        }
        self.chain = state.chain;
        self.accounts = state.accounts;
        self.banned = state.banned_addresses.into_iter().collect();
        self.current_supply = state.current_supply;
        self.confirmed = self
            .chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .map(Transaction::digest)
            .collect();
        let registered: Vec<Address> = self
            .chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| self.rules.is_registration(tx))
            .filter_map(|tx| tx.from_address.clone())
            .collect();
        self.verified.extend(registered);
        Ok(())
    }

    pub fn from_state(state: LedgerState, rules: LedgerRules) -> Result<Self, LedgerError> {
        let mut ledger = Ledger::new(rules);
        ledger.load_state(state)?;
        Ok(ledger)
    }

    /// Back to a genesis-only chain; verified identities are kept.
    pub fn reset(&mut self) {
        self.chain = vec![Block::genesis()];
        self.accounts.clear();
        self.banned.clear();
        self.confirmed.clear();
        self.current_supply = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::GENESIS_TIMESTAMP;
    use crate::utils::test_utils::{funded_ledger, signed_transfer};

    /// Start of the `n`th 10s slot after genesis.
    fn slot_time(n: u64) -> u64 {
        GENESIS_TIMESTAMP + n * 10_000
    }

    #[test]
    fn create_account_is_idempotent() {
        let mut ledger = Ledger::new(LedgerRules::default());
        let a = Address::new("a");
        assert_eq!(ledger.create_account(&a, 100).balance, 100);
        assert_eq!(ledger.create_account(&a, 200).balance, 100);
        assert_eq!(ledger.account_count(), 1);
    }

    #[test]
    fn transfer_debits_amount_and_fee() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new().address();
        let mut ledger = funded_ledger(&[(&alice, 100)]);

        let tx = signed_transfer(&alice, &bob, 50, 1);
        assert!(ledger.process_transaction(&tx));

        let sender = ledger.account(&alice.address()).unwrap();
        assert_eq!(sender.balance, 49);
        assert_eq!(sender.nonce, 1);
        let receiver = ledger.account(&bob).unwrap();
        assert_eq!(receiver.balance, 50);
        assert_eq!(receiver.nonce, 0);
    }

    #[test]
    fn overspend_is_rejected_without_mutation() {
        let alice = PrivateKey::new();
        let bob = PrivateKey::new().address();
        for (balance, amount, fee) in [(10, 10, 1), (0, 1, 0), (5, 3, 3), (100, 100, 1)] {
            let mut ledger = funded_ledger(&[(&alice, balance)]);
            let tx = signed_transfer(&alice, &bob, amount, fee);
            assert!(!ledger.process_transaction(&tx));
            assert_eq!(ledger.balance(&alice.address()), balance);
            assert_eq!(ledger.account(&alice.address()).unwrap().nonce, 0);
            assert!(ledger.account(&bob).is_none());
        }
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let mut ledger = Ledger::new(LedgerRules::default());
        let tx = signed_transfer(&PrivateKey::new(), &Address::new("b"), 1, 1);
        assert!(!ledger.process_transaction(&tx));
    }

    #[test]
    fn reward_halves_by_height() {
        let mut ledger = Ledger::new(LedgerRules::default());
        assert_eq!(ledger.current_block_reward(), 50);
        let filler = Block::genesis();
        ledger.chain.resize(HALVING_INTERVAL as usize + 1, filler.clone());
        assert_eq!(ledger.current_block_reward(), 25);
        ledger.chain.resize(2 * HALVING_INTERVAL as usize + 1, filler);
        assert_eq!(ledger.current_block_reward(), 12);
    }

    #[test]
    fn mint_pays_reward_and_fees() {
        let mut ledger = Ledger::new(LedgerRules::default());
        let proposer = Address::new("p");
        assert!(ledger.mint_block_reward(&proposer, 3));
        assert_eq!(ledger.balance(&proposer), 53);
        assert_eq!(ledger.current_supply(), 50);
    }

    #[test]
    fn mint_near_cap_pays_fees_only() {
        let mut ledger = Ledger::new(LedgerRules::default());
        ledger.current_supply = TOTAL_SUPPLY - 10;
        let proposer = Address::new("p");
        assert!(!ledger.mint_block_reward(&proposer, 5));
        assert_eq!(ledger.balance(&proposer), 5);
        assert_eq!(ledger.current_supply(), TOTAL_SUPPLY - 10);
        assert!(!ledger.mint_block_reward(&proposer, 5));
        assert!(ledger.current_supply() <= TOTAL_SUPPLY);
    }

    #[test]
    fn accepted_blocks_form_a_valid_chain() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 100)]);

        for i in 0..3 {
            let tx = signed_transfer(&alice, &proposer.address(), 10 + i, 1);
            let block = ledger.build_block(vec![tx], &proposer, slot_time(i + 1)).unwrap();
            let receipt = ledger.accept_block(block).unwrap();
            assert_eq!(receipt.applied, 1);
            assert!(receipt.reward_minted);
        }
        assert_eq!(ledger.height(), 3);
        assert!(ledger.is_chain_valid());
        assert_eq!(ledger.balance(&proposer.address()), 10 + 11 + 12 + 3 * 51);
    }

    #[test]
    fn flipping_an_amount_invalidates_chain() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        let tx = signed_transfer(&alice, &proposer.address(), 10, 1);
        let block = ledger.build_block(vec![tx], &proposer, slot_time(1)).unwrap();
        ledger.accept_block(block).unwrap();

        ledger.chain[1].transactions[0].amount = 11;
        assert!(!ledger.is_chain_valid());
    }

    #[test]
    fn block_not_on_head_is_invalid_chain_link() {
        let proposer = PrivateKey::new();
        let mut ledger = Ledger::new(LedgerRules::default());
        let mut block = Block::new(1, Vec::new(), Hash([9u8; 32]), proposer.address());
        block.sign_block(&proposer).unwrap();
        assert!(matches!(
            ledger.accept_block(block),
            Err(LedgerError::InvalidChainLink { .. })
        ));
        assert_eq!(ledger.height(), 0);
    }

    #[test]
    fn unaffordable_transactions_are_skipped_without_fee() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 20)]);
        let ok = signed_transfer(&alice, &proposer.address(), 10, 2);
        let too_much = signed_transfer(&alice, &proposer.address(), 50, 7);
        let block = ledger
            .build_block(vec![ok, too_much.clone()], &proposer, slot_time(1))
            .unwrap();

        let receipt = ledger.accept_block(block).unwrap();
        assert_eq!(receipt.applied, 1);
        assert_eq!(receipt.skipped, vec![too_much.digest()]);
        assert_eq!(receipt.fees, 2);
        assert_eq!(ledger.balance(&alice.address()), 8);
    }

    #[test]
    fn chain_validation_rejects_bad_genesis_and_empty() {
        assert!(!is_chain_valid(&[]));
        let key = PrivateKey::new();
        let mut first = Block::new(1, Vec::new(), Hash([1u8; 32]), key.address());
        first.sign_block(&key).unwrap();
        assert!(!is_chain_valid(&[first]));
        assert!(is_chain_valid(&[Block::genesis()]));
    }

    #[test]
    fn propose_block_requires_verified_identity() {
        let proposer = PrivateKey::new();
        let mut ledger = Ledger::new(LedgerRules::default());
        assert!(matches!(
            ledger.propose_block(Vec::new(), &proposer, slot_time(1)),
            Err(LedgerError::UnverifiedProposer(_))
        ));

        ledger.add_verified_identity(proposer.address());
        let block = ledger.propose_block(Vec::new(), &proposer, slot_time(1)).unwrap();
        assert_eq!(ledger.latest_block().hash, block.hash);
    }

    #[test]
    fn registration_transfer_verifies_sender() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        let rules = ledger.rules().clone();
        let tx = signed_transfer(&alice, &rules.master_address, rules.identity_fee, 1);
        let block = ledger.build_block(vec![tx], &proposer, slot_time(1)).unwrap();
        ledger.accept_block(block).unwrap();
        assert!(ledger.is_identity_verified(&alice.address()));

        let rebuilt = Ledger::from_state(ledger.serialize_state(), rules).unwrap();
        assert!(rebuilt.is_identity_verified(&alice.address()));
    }

    #[test]
    fn state_round_trips_through_json() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        ledger.ban_address(Address::new("mallory"));
        let tx = signed_transfer(&alice, &proposer.address(), 10, 1);
        let block = ledger.build_block(vec![tx], &proposer, slot_time(1)).unwrap();
        ledger.accept_block(block).unwrap();

        let json = serde_json::to_string_pretty(&ledger.serialize_state()).unwrap();
        assert!(json.contains("\"bannedAddresses\""));
        assert!(json.contains("\"currentSupply\""));
        let state: LedgerState = serde_json::from_str(&json).unwrap();
        let loaded = Ledger::from_state(state, LedgerRules::default()).unwrap();

        assert!(loaded.is_chain_valid());
        assert_eq!(loaded.chain(), ledger.chain());
        assert_eq!(loaded.balance(&alice.address()), 89);
        assert!(loaded.is_address_banned(&Address::new("mallory")));
        assert_eq!(loaded.current_supply(), ledger.current_supply());
    }

    #[test]
    fn load_state_keeps_recorded_hash() {
        let proposer = PrivateKey::new();
        let mut ledger = Ledger::new(LedgerRules::default());
        let block = ledger.build_block(Vec::new(), &proposer, slot_time(1)).unwrap();
        ledger.accept_block(block).unwrap();

        let mut state = ledger.serialize_state();
        state.chain[1].timestamp += 1;
        let loaded = Ledger::from_state(state, LedgerRules::default()).unwrap();
        assert_ne!(loaded.chain()[1].compute_hash(), loaded.chain()[1].hash);
        assert!(!loaded.is_chain_valid());
    }

    #[test]
    fn seed_genesis_respects_cap_and_height() {
        let mut ledger = Ledger::new(LedgerRules::default());
        let a = Address::new("a");
        assert!(matches!(
            ledger.seed_genesis(&[(a.clone(), TOTAL_SUPPLY + 1)]),
            Err(LedgerError::SupplyExceeded { .. })
        ));
        ledger.seed_genesis(&[(a.clone(), 1_000)]).unwrap();
        assert_eq!(ledger.balance(&a), 1_000);
        assert_eq!(ledger.current_supply(), 1_000);

        let proposer = PrivateKey::new();
        let block = ledger.build_block(Vec::new(), &proposer, slot_time(1)).unwrap();
        ledger.accept_block(block).unwrap();
        assert!(matches!(
            ledger.seed_genesis(&[(a, 1)]),
            Err(LedgerError::ChainNotEmpty(1))
        ));
    }

    #[test]
    fn find_transaction_reports_confirmations() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        let tx = signed_transfer(&alice, &proposer.address(), 10, 1);
        let block = ledger.build_block(vec![tx.clone()], &proposer, slot_time(1)).unwrap();
        ledger.accept_block(block).unwrap();
        let empty = ledger.build_block(Vec::new(), &proposer, slot_time(2)).unwrap();
        ledger.accept_block(empty).unwrap();

        let found = ledger.find_transaction(&tx.digest()).unwrap();
        assert_eq!(found.block_index, 1);
        assert_eq!(found.confirmations, 2);
        assert!(ledger.find_transaction(&Hash([3u8; 32])).is_none());
    }

    #[test]
    fn confirmed_transaction_is_not_applied_twice() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let bob = Address::new("bob");
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        let tx = signed_transfer(&alice, &bob, 10, 1);

        let first = ledger
            .build_block(vec![tx.clone()], &proposer, slot_time(1))
            .unwrap();
        assert_eq!(ledger.accept_block(first).unwrap().applied, 1);
        assert!(ledger.is_transaction_confirmed(&tx.digest()));

        let replay = ledger
            .build_block(vec![tx.clone()], &proposer, slot_time(2))
            .unwrap();
        let receipt = ledger.accept_block(replay).unwrap();
        assert_eq!(receipt.applied, 0);
        assert_eq!(receipt.skipped, vec![tx.digest()]);
        assert_eq!(receipt.fees, 0);
        assert_eq!(ledger.balance(&bob), 10);
        assert_eq!(ledger.balance(&alice.address()), 89);
        assert_eq!(ledger.height(), 2);
    }

    #[test]
    fn repeated_transaction_in_one_block_applies_once() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let bob = Address::new("bob");
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        let tx = signed_transfer(&alice, &bob, 10, 1);

        let block = ledger
            .build_block(vec![tx.clone(), tx.clone()], &proposer, slot_time(1))
            .unwrap();
        let receipt = ledger.accept_block(block).unwrap();
        assert_eq!(receipt.applied, 1);
        assert_eq!(receipt.skipped, vec![tx.digest()]);
        assert_eq!(ledger.balance(&bob), 10);
    }

    #[test]
    fn confirmed_digests_survive_reload_and_clear_on_reset() {
        let alice = PrivateKey::new();
        let proposer = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        let tx = signed_transfer(&alice, &proposer.address(), 10, 1);
        let block = ledger
            .build_block(vec![tx.clone()], &proposer, slot_time(1))
            .unwrap();
        ledger.accept_block(block).unwrap();

        let mut loaded =
            Ledger::from_state(ledger.serialize_state(), LedgerRules::default()).unwrap();
        assert!(loaded.is_transaction_confirmed(&tx.digest()));
        loaded.reset();
        assert!(!loaded.is_transaction_confirmed(&tx.digest()));
    }

    #[test]
    fn state_above_supply_cap_is_rejected() {
        let mut state = Ledger::new(LedgerRules::default()).serialize_state();
        state.current_supply = TOTAL_SUPPLY * 10;
        assert!(state.is_chain_valid());
        assert!(!state.is_valid());
        assert!(matches!(
            Ledger::from_state(state, LedgerRules::default()),
            Err(LedgerError::MalformedPersistedState)
        ));

        let mut at_cap = Ledger::new(LedgerRules::default()).serialize_state();
        at_cap.current_supply = TOTAL_SUPPLY;
        assert!(at_cap.is_valid());
    }

    #[test]
    fn seed_genesis_over_cap_reports_nothing_available() {
        let mut ledger = Ledger::new(LedgerRules::default());
        ledger.current_supply = TOTAL_SUPPLY + 1;
        assert!(matches!(
            ledger.seed_genesis(&[(Address::new("a"), 1)]),
            Err(LedgerError::SupplyExceeded {
                requested: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn reset_returns_to_genesis() {
        let alice = PrivateKey::new();
        let mut ledger = funded_ledger(&[(&alice, 100)]);
        ledger.reset();
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.account_count(), 0);
        assert_eq!(ledger.current_supply(), 0);
    }
}
