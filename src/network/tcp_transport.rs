//! TCP transport with length-prefixed framing.
//!
//! # Connection model
//!
//! - Outbound connections store their write half keyed by the peer's listen
//!   address; that key is also what [`Rpc::from`] carries, so every message
//!   can be answered with [`Transport::send_message`].
//! - Inbound connections only use the read half. If no outbound connection to
//!   the peer exists yet, one is opened to the listen address it announced.
//! - Writers are removed when their read loop ends.
//!
//! # Framing
//!
//! Every frame is `[len: u32 LE][bytes]`, capped at [`MAX_FRAME_LEN`]. The
//! first frame on an outbound connection is a [`Handshake`]; every later
//! frame is an encoded [`Rpc`].

use crate::crypto::key_pair::{PrivateKey, Signature, verify_with_address};
use crate::network::rpc::Rpc;
use crate::network::transport::{BoxFuture, Transport, TransportError};
use crate::types::address::Address;
use crate::types::encoding::{Decode, Encode};
use crate::types::hash::Hash;
use crate::{debug, warn};
use dashmap::DashMap;
use rand_core::{OsRng, RngCore};
use stakechain_derive::BinaryCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::time::{Duration, timeout};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const HANDSHAKE_TAG: &[u8] = b"STAKECHAIN/HANDSHAKE";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_ATTEMPTS: u32 = 5;

/// Announces the sender's listen address, signed by its node key.
#[derive(Debug, BinaryCodec)]
struct Handshake {
    listen_addr: String,
    node: Address,
    nonce: [u8; 32],
    signature: Signature,
}

impl Handshake {
    fn digest(listen_addr: &str, node: &Address, nonce: &[u8; 32]) -> Hash {
        let mut h = Hash::sha256();
        h.update(HANDSHAKE_TAG);
        listen_addr.encode(&mut h);
        node.encode(&mut h);
        nonce.encode(&mut h);
        h.finalize()
    }

    fn new(listen_addr: SocketAddr, identity: &PrivateKey) -> io::Result<Self> {
        let listen_addr = listen_addr.to_string();
        let node = identity.address();
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let signature = identity
            .sign_digest(&Self::digest(&listen_addr, &node, &nonce))
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Self {
            listen_addr,
            node,
            nonce,
            signature,
        })
    }

    fn verify(&self) -> bool {
        let digest = Self::digest(&self.listen_addr, &self.node, &self.nonce);
        verify_with_address(&self.node, &digest, &self.signature)
    }

    async fn read(reader: &mut OwnedReadHalf) -> io::Result<SocketAddr> {
        let frame = read_frame(reader).await?;
        let handshake = Handshake::from_bytes(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if !handshake.verify() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "handshake signature verification failed",
            ));
        }
        handshake
            .listen_addr
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid listen address"))
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} out of range"),
        ));
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

async fn write_frame(writer: &mut OwnedWriteHalf, data: &[u8]) -> io::Result<()> {
    if data.is_empty() || data.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame length {} out of range", data.len()),
        ));
    }
    writer.write_all(&(data.len() as u32).to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

pub struct TcpTransport {
    listen_address: SocketAddr,
    /// Signs handshakes so peers know which node key is behind an address.
    identity: PrivateKey,
    writers: DashMap<SocketAddr, Arc<Mutex<OwnedWriteHalf>>>,
    tx: Sender<Rpc>,
    rx: Mutex<Option<Receiver<Rpc>>>,
}

impl TcpTransport {
    pub fn new(address: SocketAddr, identity: PrivateKey) -> Arc<Self> {
        let (tx, rx) = channel(1024);

        Arc::new(Self {
            listen_address: address,
            identity,
            writers: DashMap::new(),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    async fn read_loop(mut reader: OwnedReadHalf, peer: SocketAddr, tx: Sender<Rpc>) {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(frame) => frame,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return,
                Err(e) => {
                    debug!("Dropping connection from {peer}: {e}");
                    return;
                }
            };

            let mut rpc = match Rpc::from_bytes(&frame) {
                Ok(rpc) => rpc,
                Err(e) => {
                    warn!("Undecodable frame from {peer}: {e}");
                    continue;
                }
            };
            // The authenticated listen address, not whatever the peer claims.
            rpc.from = peer.to_string();

            if tx.send(rpc).await.is_err() {
                return;
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.handle_inbound(stream).await;
                    });
                }
                Err(e) => debug!("Accept failed: {e}"),
            }
        }
    }

    async fn handle_inbound(self: Arc<Self>, stream: TcpStream) {
        let (mut reader, _writer) = stream.into_split();

        let peer = match timeout(HANDSHAKE_TIMEOUT, Handshake::read(&mut reader)).await {
            Ok(Ok(peer)) => peer,
            Ok(Err(e)) => {
                warn!("Rejected inbound connection: {e}");
                return;
            }
            Err(_) => {
                warn!("Inbound handshake timed out");
                return;
            }
        };

        // Replies go out over our own connection, so it must exist before
        // the first message is handed to the node.
        if !self.writers.contains_key(&peer) {
            if let Err(e) = self.clone().establish_outbound_connection(peer).await {
                warn!("Could not connect back to {peer}: {e}");
            }
        }

        Self::read_loop(reader, peer, self.tx.clone()).await;
    }

    /// Connects with exponential backoff (100ms, 200ms, ... for
    /// [`CONNECT_ATTEMPTS`] tries) and sends the handshake.
    async fn establish_outbound_connection(
        self: Arc<Self>,
        target: SocketAddr,
    ) -> Result<(), TransportError> {
        let mut delay = Duration::from_millis(100);
        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect(target).await {
                Ok(stream) => {
                    let (reader, mut writer) = stream.into_split();
                    let handshake = Handshake::new(self.listen_address, &self.identity)?;
                    write_frame(&mut writer, &handshake.to_bytes()).await?;

                    self.writers.insert(target, Arc::new(Mutex::new(writer)));

                    let tx = self.tx.clone();
                    let this = self.clone();
                    tokio::spawn(async move {
                        Self::read_loop(reader, target, tx).await;
                        this.writers.remove(&target);
                    });
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connect to {target} failed (attempt {attempt}): {e}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        Err(TransportError::ConnectFailed(target.to_string()))
    }
}

impl Transport for TcpTransport {
    fn start(self: &Arc<Self>) -> BoxFuture<'static, Result<Receiver<Rpc>, TransportError>> {
        let this = self.clone();

        Box::pin(async move {
            let rx = this.rx.lock().await.take().ok_or(TransportError::AlreadyStarted)?;
            let listener = TcpListener::bind(this.listen_address).await?;
            tokio::spawn(this.accept_loop(listener));
            Ok(rx)
        })
    }

    fn connect(self: &Arc<Self>, addr: String) -> BoxFuture<'static, Result<(), TransportError>> {
        let this = self.clone();

        Box::pin(async move {
            let target: SocketAddr = addr
                .parse()
                .map_err(|_| TransportError::InvalidAddress(addr.clone()))?;
            if this.writers.contains_key(&target) {
                return Ok(());
            }
            this.establish_outbound_connection(target).await
        })
    }

    fn send_message(
        self: &Arc<Self>,
        to: String,
        payload: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let writer = to
            .parse::<SocketAddr>()
            .ok()
            .and_then(|addr| self.writers.get(&addr).map(|w| w.value().clone()));
        let data = Rpc::new(self.listen_address.to_string(), payload).to_bytes();

        Box::pin(async move {
            let Some(writer) = writer else {
                return Err(TransportError::PeerNotFound(to));
            };
            let mut guard = writer.lock().await;
            write_frame(&mut guard, &data)
                .await
                .map_err(|_| TransportError::SendFailed(to))
        })
    }

    fn addr(&self) -> String {
        self.listen_address.to_string()
    }

    fn peer_addrs(&self) -> Vec<String> {
        self.writers.iter().map(|e| e.key().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::Event;

    fn free_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn handshake_signature_binds_listen_address() {
        let key = PrivateKey::new();
        let mut handshake = Handshake::new("127.0.0.1:4000".parse().unwrap(), &key).unwrap();
        assert!(handshake.verify());
        let decoded = Handshake::from_bytes(&handshake.to_bytes()).unwrap();
        assert!(decoded.verify());

        handshake.listen_addr = "127.0.0.1:4001".into();
        assert!(!handshake.verify());
    }

    #[tokio::test]
    async fn message_round_trip_between_nodes() {
        let a = TcpTransport::new(free_addr(), PrivateKey::new());
        let b = TcpTransport::new(free_addr(), PrivateKey::new());
        let mut rx_a = a.start().await.unwrap();
        let mut rx_b = b.start().await.unwrap();

        a.connect(b.addr()).await.unwrap();
        let payload = Event::IbdRequest { force_sync: true }.to_bytes();
        a.send_message(b.addr(), payload.clone()).await.unwrap();

        let received = rx_b.recv().await.unwrap();
        assert_eq!(received.from, a.addr());
        assert_eq!(received.payload, payload);

        // b connected back during the handshake and can answer.
        b.send_message(received.from, vec![7]).await.unwrap();
        let reply = rx_a.recv().await.unwrap();
        assert_eq!(reply.from, b.addr());
        assert_eq!(reply.payload, vec![7]);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let a = TcpTransport::new(free_addr(), PrivateKey::new());
        let result = a.send_message("127.0.0.1:1".into(), vec![1]).await;
        assert!(matches!(result, Err(TransportError::PeerNotFound(_))));
        let result = a.connect("not an address".into()).await;
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }
}
