//! In-memory transport for tests and single-process simulations.
//!
//! Nodes are linked directly through their channels; no sockets involved.

use crate::network::rpc::Rpc;
use crate::network::transport::{BoxFuture, Transport, TransportError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};

pub struct LocalTransport {
    peers: DashMap<String, Arc<LocalTransport>>,
    tx: Sender<Rpc>,
    rx: Mutex<Option<Receiver<Rpc>>>,
    address: String,
}

impl LocalTransport {
    pub fn new(address: &str) -> Arc<LocalTransport> {
        let (tx, rx) = channel(1024);

        Arc::new(LocalTransport {
            address: address.to_string(),
            peers: DashMap::new(),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Adds both transports to each other's routing tables.
    pub fn link(self: &Arc<LocalTransport>, other: &Arc<LocalTransport>) {
        self.peers.insert(other.addr(), other.clone());
        other.peers.insert(self.addr(), self.clone());
    }

    /// Removes the link in both directions.
    pub fn unlink(&self, other: &LocalTransport) {
        self.peers.remove(&other.address);
        other.peers.remove(&self.address);
    }
}

impl Transport for LocalTransport {
    fn start(self: &Arc<Self>) -> BoxFuture<'static, Result<Receiver<Rpc>, TransportError>> {
        let this = self.clone();

        Box::pin(async move {
            let mut guard = this.rx.lock().await;
            guard.take().ok_or(TransportError::AlreadyStarted)
        })
    }

    /// Only already linked peers can be reached; see [`LocalTransport::link`].
    fn connect(self: &Arc<Self>, addr: String) -> BoxFuture<'static, Result<(), TransportError>> {
        let known = self.peers.contains_key(&addr);
        Box::pin(async move {
            if known {
                Ok(())
            } else {
                Err(TransportError::PeerNotFound(addr))
            }
        })
    }

    fn send_message(
        self: &Arc<Self>,
        to: String,
        payload: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let peer = self.peers.get(to.trim()).map(|r| r.value().clone());
        let address = self.address.clone();

        Box::pin(async move {
            let Some(peer) = peer else {
                return Err(TransportError::PeerNotFound(to));
            };

            peer.tx
                .send(Rpc::new(address, payload))
                .await
                .map_err(|_| TransportError::SendFailed(to))
        })
    }

    fn addr(&self) -> String {
        self.address.clone()
    }

    fn peer_addrs(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_is_bidirectional() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");

        tr_a.link(&tr_b);

        assert_eq!(tr_a.peer_addrs(), vec!["B".to_string()]);
        assert_eq!(tr_b.peer_addrs(), vec!["A".to_string()]);
        assert!(tr_a.connect("B".into()).await.is_ok());
        assert!(tr_a.connect("C".into()).await.is_err());
    }

    #[tokio::test]
    async fn send_message_reaches_peer() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        tr_a.link(&tr_b);

        let mut rx = tr_b.start().await.unwrap();
        tr_a.send_message(tr_b.addr(), b"The first message.".to_vec())
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.from, "A");
        assert_eq!(received.payload, b"The first message.".to_vec());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        let tr_c = LocalTransport::new("C");
        tr_a.link(&tr_b);
        tr_a.link(&tr_c);

        let mut rx_a = tr_a.start().await.unwrap();
        let mut rx_b = tr_b.start().await.unwrap();
        let mut rx_c = tr_c.start().await.unwrap();

        tr_a.broadcast(b"hello".to_vec()).await.unwrap();

        assert_eq!(rx_b.recv().await.unwrap().from, "A");
        assert_eq!(rx_c.recv().await.unwrap().from, "A");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let tr = LocalTransport::new("A");
        assert!(tr.start().await.is_ok());
        assert!(matches!(tr.start().await, Err(TransportError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn unlinked_peer_is_unreachable() {
        let tr_a = LocalTransport::new("A");
        let tr_b = LocalTransport::new("B");
        tr_a.link(&tr_b);
        tr_a.unlink(&tr_b);

        let result = tr_a.send_message("B".into(), vec![1]).await;
        assert!(matches!(result, Err(TransportError::PeerNotFound(_))));
        assert!(tr_b.peer_addrs().is_empty());
    }
}
