//! Node-local storage.
//!
//! - [`mempool`]: pending transactions grouped into fixed-size batches
//! - [`snapshot`]: JSON snapshot of the ledger state on disk

pub mod mempool;
pub mod snapshot;
