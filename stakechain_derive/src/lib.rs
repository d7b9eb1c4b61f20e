//! Derive macros for the stakechain crate.
//!
//! - `#[derive(BinaryCodec)]` emits `Encode`/`Decode` impls against
//!   `crate::types::encoding`, used for wire events and digests.
//! - `#[derive(Error)]` emits `Display`, `Error` and, for `#[from]` fields,
//!   `From` conversions.

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` with fields written in declaration order.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` from `#[error("...")]` attributes.
#[proc_macro_derive(Error, attributes(error, from))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
