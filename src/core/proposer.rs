//! Slot-based proposer rotation.
//!
//! Time is cut into fixed `block_time_ms` slots. The proposer for a slot is
//! picked round-robin from the sorted verified identities, so every node with
//! the same identity set agrees on it without exchanging messages.

use crate::core::block::Block;
use crate::core::ledger::Ledger;
use crate::types::address::Address;
use crate::types::hash::Hash;
use stakechain_derive::Error;
use std::fmt;

/// Consensus timing and eligibility parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainParams {
    /// Slot length in milliseconds.
    pub block_time_ms: u64,
    /// Trailing part of each slot in which production is suppressed.
    pub slot_safety_margin_ms: u64,
    /// Balance an identity needs to be preferred as proposer.
    pub min_stake: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_time_ms: 10_000,
            slot_safety_margin_ms: 1_000,
            min_stake: 0,
        }
    }
}

impl ChainParams {
    pub fn slot(&self, timestamp: u64) -> u64 {
        timestamp / self.block_time_ms.max(1)
    }

    /// Milliseconds elapsed since the start of the slot containing `timestamp`.
    pub fn slot_offset(&self, timestamp: u64) -> u64 {
        timestamp % self.block_time_ms.max(1)
    }

    /// Whether `timestamp` falls in the trailing safety margin of its slot.
    pub fn in_safety_margin(&self, timestamp: u64) -> bool {
        let cutoff = self
            .block_time_ms
            .max(1)
            .saturating_sub(self.slot_safety_margin_ms);
        self.slot_offset(timestamp) >= cutoff
    }
}

#[derive(Debug, Error)]
pub enum ProposerError {
    #[error("slot {slot} belongs to {expected}, block was proposed by {actual}")]
    InvalidProposer {
        slot: u64,
        expected: Address,
        actual: Address,
    },
    #[error("slot {0} already has a block")]
    SlotOccupied(u64),
    #[error("block timestamp {timestamp} is past the accepted limit {limit}")]
    FutureBlock { timestamp: u64, limit: u64 },
    #[error("block builds on {actual}, local head is {expected}")]
    PreviousHashMismatch { expected: Hash, actual: Hash },
}

/// Why the local node is not producing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductionSkip {
    NotOurSlot { slot: u64, proposer: Address },
    NoFullBatch,
    SlotOccupied(u64),
    SafetyMargin(u64),
}

impl fmt::Display for ProductionSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductionSkip::NotOurSlot { slot, proposer } => {
                write!(f, "slot {slot} belongs to {}", proposer.short())
            }
            ProductionSkip::NoFullBatch => write!(f, "no full batch"),
            ProductionSkip::SlotOccupied(slot) => write!(f, "slot {slot} already filled"),
            ProductionSkip::SafetyMargin(slot) => write!(f, "inside safety margin of slot {slot}"),
        }
    }
}

pub struct ProposerSelector {
    params: ChainParams,
    local: Address,
}

impl ProposerSelector {
    pub fn new(params: ChainParams, local: Address) -> Self {
        Self { params, local }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// Verified identities meeting `min_stake`, falling back to all verified
    /// identities, then to the local node alone. Always sorted and non-empty.
    pub fn eligible(&self, ledger: &Ledger) -> Vec<Address> {
        let verified: Vec<Address> = ledger.verified_identities().cloned().collect();
        let staked: Vec<Address> = verified
            .iter()
            .filter(|address| ledger.balance(address) >= self.params.min_stake)
            .cloned()
            .collect();
        if !staked.is_empty() {
            staked
        } else if !verified.is_empty() {
            verified
        } else {
            vec![self.local.clone()]
        }
    }

    pub fn proposer_for_slot(&self, ledger: &Ledger, slot: u64) -> Address {
        let eligible = self.eligible(ledger);
        let index = (slot % eligible.len() as u64) as usize;
        eligible[index].clone()
    }

    /// `None` when the local node should produce a block at `now`.
    pub fn production_blocker(
        &self,
        ledger: &Ledger,
        now: u64,
        has_full_batch: bool,
    ) -> Option<ProductionSkip> {
        let slot = self.params.slot(now);
        let proposer = self.proposer_for_slot(ledger, slot);
        if proposer != self.local {
            return Some(ProductionSkip::NotOurSlot { slot, proposer });
        }
        if !has_full_batch {
            return Some(ProductionSkip::NoFullBatch);
        }
        if self.params.slot(ledger.latest_block().timestamp) >= slot {
            return Some(ProductionSkip::SlotOccupied(slot));
        }
        if self.params.in_safety_margin(now) {
            return Some(ProductionSkip::SafetyMargin(slot));
        }
        None
    }

    pub fn should_produce(&self, ledger: &Ledger, now: u64, has_full_batch: bool) -> bool {
        self.production_blocker(ledger, now, has_full_batch).is_none()
    }

    /// Slot checks for a block received from a peer at local time `now`.
    ///
    /// Blocks stamped more than one slot after `now` are refused. A
    /// [`ProposerError::PreviousHashMismatch`] means the peer's chain diverged
    /// and should be answered with a sync, not treated as misbehaviour.
    pub fn check_foreign_block(
        &self,
        ledger: &Ledger,
        block: &Block,
        now: u64,
    ) -> Result<(), ProposerError> {
        let limit = now.saturating_add(self.params.block_time_ms);
        if block.timestamp > limit {
            return Err(ProposerError::FutureBlock {
                timestamp: block.timestamp,
                limit,
            });
        }
        let slot = self.params.slot(block.timestamp);
        let expected = self.proposer_for_slot(ledger, slot);
        if expected != block.proposer {
            return Err(ProposerError::InvalidProposer {
                slot,
                expected,
                actual: block.proposer.clone(),
            });
        }
        let head = ledger.latest_block();
        if self.params.slot(head.timestamp) >= slot {
            return Err(ProposerError::SlotOccupied(slot));
        }
        if block.previous_hash != head.hash {
            return Err(ProposerError::PreviousHashMismatch {
                expected: head.hash,
                actual: block.previous_hash,
            });
        }
        Ok(())
    }
}
