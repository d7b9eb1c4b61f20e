//! Primitive types shared by every layer of the node.
//!
//! - `Hash`: 32-byte SHA-256 digest with hex JSON form
//! - `Address`: hex public-key account identifier
//! - `Encode`/`Decode`: deterministic binary codec behind digests and the wire

pub mod address;
pub mod encoding;
pub mod hash;
