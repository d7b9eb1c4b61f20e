//! Stakechain node library.
//!
//! Account ledger with slot-based proposer rotation, a batched mempool,
//! gossip over TCP and longest-valid-chain initial block download.

pub mod config;
pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod types;
pub mod utils;
