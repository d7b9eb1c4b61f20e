//! secp256k1 ECDSA identities and encrypted key storage.

pub mod key_pair;
pub mod keystore;
