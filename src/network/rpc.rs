//! Envelope for payloads received from a peer.

use crate::network::message::Event;
use crate::network::transport::BoxFuture;
use crate::types::encoding::{Decode, DecodeError};
use stakechain_derive::BinaryCodec;
use std::sync::Arc;

/// Raw payload together with the address it can be answered on.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Rpc {
    pub from: String,
    pub payload: Vec<u8>,
}

impl Rpc {
    pub fn new(from: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.into(),
            payload: payload.into(),
        }
    }

    pub fn decode(self) -> Result<DecodedMessage, DecodeError> {
        Ok(DecodedMessage {
            event: Event::from_bytes(&self.payload)?,
            from: self.from,
        })
    }
}

#[derive(Debug)]
pub struct DecodedMessage {
    pub from: String,
    pub event: Event,
}

/// Handles decoded events; implemented by the node server.
pub trait RpcProcessor: Send + Sync {
    type Error;

    fn process_message(
        self: Arc<Self>,
        decoded: DecodedMessage,
    ) -> BoxFuture<'static, Result<(), Self::Error>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::Encode;

    #[test]
    fn rpc_serialization_roundtrip() {
        let rpc = Rpc::new("node_a", vec![1, 2, 3, 4, 5]);
        let decoded = Rpc::from_bytes(&rpc.to_bytes()).unwrap();
        assert_eq!(decoded, rpc);
    }

    #[test]
    fn decode_reads_event() {
        let payload = Event::IbdRequest { force_sync: false }.to_bytes();
        let decoded = Rpc::new("peer", payload).decode().unwrap();
        assert_eq!(decoded.from, "peer");
        assert_eq!(decoded.event, Event::IbdRequest { force_sync: false });
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        assert!(Rpc::new("peer", vec![0xff]).decode().is_err());
    }
}
