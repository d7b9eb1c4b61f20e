//! Gossip and chain-sync events exchanged between nodes.
//!
//! Every payload that crosses the wire is one [`Event`], decoded once at the
//! transport boundary. Full ledger snapshots travel as the same JSON document
//! that is written to disk, so a peer's state can be validated with the exact
//! code that validates a local snapshot.

use crate::core::block::Block;
use crate::core::ledger::LedgerState;
use crate::core::transaction::Transaction;
use crate::types::address::Address;
use stakechain_derive::BinaryCodec;

#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Event {
    /// A signed transaction for the mempool.
    NewTransaction(Transaction),
    /// A freshly produced block. With `genesis` set, the block (and `state`,
    /// if present) seeds a peer that has not advanced past genesis.
    NewBlock {
        block: Block,
        genesis: bool,
        state: Option<Vec<u8>>,
    },
    /// Ask peers for their full state.
    IbdRequest { force_sync: bool },
    /// Full state in answer to an [`Event::IbdRequest`].
    IbdResponse { state: Vec<u8>, force_sync: bool },
    /// Advisory: the sender expects `proposer` to fill `slot`.
    SelectedProposer { proposer: Address, slot: u64 },
    NewIdentity { address: Address },
    NewWallet { address: Address },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::NewTransaction(_) => "NEW_TRANSACTION",
            Event::NewBlock { .. } => "NEW_BLOCK",
            Event::IbdRequest { .. } => "IBD_REQUEST",
            Event::IbdResponse { .. } => "IBD_RESPONSE",
            Event::SelectedProposer { .. } => "SELECTED_PROPOSER",
            Event::NewIdentity { .. } => "NEW_IDENTITY",
            Event::NewWallet { .. } => "NEW_WALLET",
        }
    }

    pub fn ibd_response(state: &LedgerState, force_sync: bool) -> Result<Self, serde_json::Error> {
        Ok(Event::IbdResponse {
            state: encode_state(state)?,
            force_sync,
        })
    }

    pub fn genesis_block(block: Block, state: Option<&LedgerState>) -> Result<Self, serde_json::Error> {
        Ok(Event::NewBlock {
            block,
            genesis: true,
            state: state.map(encode_state).transpose()?,
        })
    }
}

pub fn encode_state(state: &LedgerState) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(state)
}

pub fn decode_state(bytes: &[u8]) -> Result<LedgerState, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;
    use crate::types::encoding::{Decode, Encode};
    use crate::utils::test_utils::{ledger_with_blocks, signed_transfer};

    #[test]
    fn event_discriminants() {
        let request = Event::IbdRequest { force_sync: true }.to_bytes();
        assert_eq!(request, vec![2, 1]);

        let identity = Event::NewIdentity {
            address: Address::new("a"),
        };
        assert_eq!(identity.to_bytes()[0], 5);
    }

    #[test]
    fn transaction_event_keeps_signature() {
        let key = PrivateKey::new();
        let tx = signed_transfer(&key, &Address::new("bob"), 3, 1);
        let bytes = Event::NewTransaction(tx.clone()).to_bytes();
        match Event::from_bytes(&bytes).unwrap() {
            Event::NewTransaction(decoded) => {
                assert_eq!(decoded, tx);
                assert!(decoded.is_valid().unwrap());
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[test]
    fn ibd_response_carries_valid_state() {
        let ledger = ledger_with_blocks(&PrivateKey::new(), 2);
        let event = Event::ibd_response(&ledger.serialize_state(), false).unwrap();
        let Event::IbdResponse { state, force_sync } = Event::from_bytes(&event.to_bytes()).unwrap()
        else {
            panic!("expected IBD_RESPONSE");
        };
        assert!(!force_sync);
        let state = decode_state(&state).unwrap();
        assert_eq!(state.len(), 3);
        assert!(state.is_chain_valid());
    }

    #[test]
    fn truncated_event_is_rejected() {
        let bytes = Event::NewWallet {
            address: Address::new("wallet"),
        }
        .to_bytes();
        assert!(Event::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Event::from_bytes(&[42]).is_err());
    }
}
