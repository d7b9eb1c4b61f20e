//! Ledger data model and consensus rules.
//!
//! - `Transaction`: signed value transfer, or an unsigned system credit
//! - `Block`: ordered transactions linked to their parent by hash
//! - `Account`: balance and nonce for one address
//! - `Ledger`: chain, accounts and supply, with block acceptance and rewards
//! - `ProposerSelector`: slot arithmetic and round-robin proposer rotation

pub mod account;
pub mod block;
pub mod ledger;
pub mod proposer;
pub mod transaction;
