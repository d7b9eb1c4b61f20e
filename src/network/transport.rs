//! Transport abstraction shared by the in-memory and TCP implementations.
//!
//! Peers are addressed by opaque strings: a node name for
//! [`LocalTransport`](crate::network::local_transport::LocalTransport), a
//! `host:port` listen address for
//! [`TcpTransport`](crate::network::tcp_transport::TcpTransport).

use crate::network::rpc::Rpc;
use stakechain_derive::Error;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

/// A boxed, pinned, send-safe future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer not found: {0}")]
    PeerNotFound(String),
    #[error("failed to send message to {0}")]
    SendFailed(String),
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
    #[error("transport already started")]
    AlreadyStarted,
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
    #[error("could not connect to {0}")]
    ConnectFailed(String),
    #[error("transport i/o failed: {0}")]
    Io(#[from] io::Error),
}

pub trait Transport: Send + Sync + 'static {
    /// Begins accepting peers and hands out the inbound message stream.
    /// Fails with [`TransportError::AlreadyStarted`] on a second call.
    fn start(self: &Arc<Self>) -> BoxFuture<'static, Result<Receiver<Rpc>, TransportError>>;

    fn connect(self: &Arc<Self>, addr: String) -> BoxFuture<'static, Result<(), TransportError>>;

    fn send_message(
        self: &Arc<Self>,
        to: String,
        payload: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Sends `payload` to every connected peer. Every peer is attempted even
    /// if an earlier one fails; the first failure is reported.
    fn broadcast(self: &Arc<Self>, payload: Vec<u8>) -> BoxFuture<'static, Result<(), TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            let mut first_error = None;
            for peer in this.peer_addrs() {
                if let Err(e) = this.send_message(peer, payload.clone()).await {
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => Err(TransportError::BroadcastFailed(e.to_string())),
                None => Ok(()),
            }
        })
    }

    fn addr(&self) -> String;

    fn peer_addrs(&self) -> Vec<String>;
}
