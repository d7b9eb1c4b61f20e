//! Network layer: transports, gossip events and the node server.
//!
//! - [`transport`]: Transport trait and error types
//! - [`tcp_transport`]: Length-prefixed TCP transport with signed handshakes
//! - [`local_transport`]: In-memory transport for testing
//! - [`message`]: Gossip and chain-sync events
//! - [`rpc`]: Raw inbound messages and the processor trait
//! - [`ibd`]: Initial block download window and chain selection
//! - [`server`]: Event loop, block production and the node API

pub mod ibd;
pub mod local_transport;
pub mod message;
pub mod rpc;
pub mod server;
pub mod tcp_transport;
pub mod transport;
