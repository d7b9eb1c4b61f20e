//! The node: event loop, block production and the caller-facing API.
//!
//! All business state (ledger, mempool, IBD bookkeeping) sits behind one
//! async mutex, so every check-then-mutate sequence runs exclusively and
//! events are applied one at a time in arrival order. Network sends happen
//! after the lock is released.

use crate::config::NodeConfig;
use crate::core::block::Block;
use crate::core::ledger::{Ledger, LedgerError, LedgerRules, LedgerState, TransactionLocation};
use crate::core::proposer::{ChainParams, ProposerError, ProposerSelector};
use crate::core::transaction::{Transaction, TransactionError};
use crate::crypto::key_pair::{PrivateKey, PublicKey};
use crate::network::ibd::{IbdAction, IbdCoordinator, IbdOutcome, IgnoreReason};
use crate::network::message::{Event, decode_state};
use crate::network::rpc::{DecodedMessage, Rpc, RpcProcessor};
use crate::network::transport::{BoxFuture, Transport, TransportError};
use crate::storage::mempool::{AdmissionError, Mempool};
use crate::storage::snapshot::{SnapshotError, SnapshotStore};
use crate::types::address::Address;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use crate::utils::now_millis;
use crate::{debug, error, info, warn};
use serde::Serialize;
use stakechain_derive::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::sync::{Mutex, MutexGuard, oneshot};
use tokio::time::{MissedTickBehavior, interval, sleep};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Admission(#[from] AdmissionError),
    #[error("{0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Transaction(#[from] TransactionError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Snapshot(#[from] SnapshotError),
    #[error("cannot encode state: {0}")]
    Encoding(String),
    #[error("event loop already running")]
    AlreadyRunning,
}

/// Server settings, usually derived from a [`NodeConfig`].
#[derive(Clone)]
pub struct ServerOps {
    /// Proposer key; its address is the node's identity.
    pub key: PrivateKey,
    pub chain: ChainParams,
    pub rules: LedgerRules,
    pub min_transaction_fee: u64,
    pub batch_size: usize,
    pub ibd_window_ms: u64,
    /// Snapshot directory; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl ServerOps {
    pub fn from_config(config: &NodeConfig, key: PrivateKey) -> Self {
        Self {
            key,
            chain: config.chain_params(),
            rules: config.ledger_rules(),
            min_transaction_fee: config.min_transaction_fee,
            batch_size: config.batch_size,
            ibd_window_ms: config.ibd_window_ms,
            data_dir: Some(config.data_dir.clone()),
        }
    }
}

/// Summary returned by [`Server::chain_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub height: u64,
    pub latest_hash: Hash,
    pub accounts: usize,
    pub current_supply: u64,
    pub block_reward: u64,
    pub min_transaction_fee: u64,
    pub pending_transactions: usize,
    pub verified_identities: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Confirmed(TransactionLocation),
    Pending(Transaction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressStatus {
    Banned,
    Active,
}

struct NodeState {
    ledger: Ledger,
    mempool: Mempool,
    ibd: IbdCoordinator,
    /// Last slot this node announced itself for.
    announced_slot: Option<u64>,
}

pub struct Server<T: Transport> {
    transport: Arc<T>,
    key: PrivateKey,
    address: Address,
    selector: ProposerSelector,
    min_fee: u64,
    store: Option<SnapshotStore>,
    state: Mutex<NodeState>,
    window_tx: Sender<u64>,
    window_rx: Mutex<Option<Receiver<u64>>>,
}

impl<T: Transport> Server<T> {
    /// Opens the snapshot store (if configured) and loads the persisted
    /// ledger, falling back to genesis.
    pub async fn new(transport: Arc<T>, ops: ServerOps) -> Result<Arc<Self>, ServerError> {
        let (store, ledger) = match &ops.data_dir {
            Some(dir) => {
                let store = SnapshotStore::open(dir)?;
                let ledger = store.load_or_genesis(ops.rules.clone()).await;
                (Some(store), ledger)
            }
            None => (None, Ledger::new(ops.rules.clone())),
        };
        Ok(Self::assemble(transport, ops, ledger, store))
    }

    /// In-memory server starting from `ledger`.
    pub fn with_ledger(transport: Arc<T>, ops: ServerOps, ledger: Ledger) -> Arc<Self> {
        Self::assemble(transport, ops, ledger, None)
    }

    fn assemble(
        transport: Arc<T>,
        ops: ServerOps,
        ledger: Ledger,
        store: Option<SnapshotStore>,
    ) -> Arc<Self> {
        let address = ops.key.address();
        let (window_tx, window_rx) = channel(16);
        Arc::new(Self {
            transport,
            selector: ProposerSelector::new(ops.chain.clone(), address.clone()),
            address,
            key: ops.key,
            min_fee: ops.min_transaction_fee,
            store,
            state: Mutex::new(NodeState {
                ledger,
                mempool: Mempool::new(ops.batch_size),
                ibd: IbdCoordinator::new(ops.ibd_window_ms),
                announced_slot: None,
            }),
            window_tx,
            window_rx: Mutex::new(Some(window_rx)),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Runs until `shutdown` fires or the transport stream closes.
    ///
    /// Inbound events, IBD window timers and production ticks are handled one
    /// at a time on this task.
    pub async fn run(
        self: Arc<Self>,
        mut rpcs: Receiver<Rpc>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut windows = self
            .window_rx
            .lock()
            .await
            .take()
            .ok_or(ServerError::AlreadyRunning)?;
        let tick = Duration::from_millis((self.selector.params().block_time_ms / 10).max(50));
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Node {} running", self.address.short());
        loop {
            tokio::select! {
                maybe_rpc = rpcs.recv() => {
                    let Some(rpc) = maybe_rpc else { break };
                    self.handle_rpc(rpc).await;
                }
                Some(window_id) = windows.recv() => {
                    self.close_ibd_window(window_id).await;
                }
                _ = ticker.tick() => {
                    self.tick(now_millis()).await;
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }
        info!("Node {} shut down", self.address.short());
        Ok(())
    }

    pub async fn handle_rpc(self: &Arc<Self>, rpc: Rpc) {
        match rpc.decode() {
            Ok(decoded) => {
                if let Err(e) = self.clone().process_message(decoded).await {
                    warn!("{e}");
                }
            }
            Err(e) => warn!("Dropping undecodable message: {e}"),
        }
    }

    async fn handle_event(&self, from: String, event: Event) -> Result<(), ServerError> {
        debug!("{} from {from}", event.name());
        match event {
            Event::NewTransaction(tx) => self.on_transaction(tx).await,
            Event::NewBlock {
                block,
                genesis: true,
                state,
            } => self.on_genesis(block, state).await,
            Event::NewBlock { block, .. } => self.on_block(block).await,
            Event::IbdRequest { force_sync } => self.on_ibd_request(from, force_sync).await,
            Event::IbdResponse { state, force_sync } => {
                self.on_ibd_response(from, state, force_sync).await
            }
            Event::SelectedProposer { proposer, slot } => {
                let state = self.state.lock().await;
                let expected = self.selector.proposer_for_slot(&state.ledger, slot);
                if expected != proposer {
                    warn!(
                        "Peer {from} announced {} for slot {slot}, expected {}",
                        proposer.short(),
                        expected.short()
                    );
                }
                Ok(())
            }
            Event::NewIdentity { address } => {
                if PublicKey::from_address(&address).is_none() {
                    warn!("Ignoring identity {}: not a public key", address.short());
                    return Ok(());
                }
                let mut state = self.state.lock().await;
                if !state.ledger.is_identity_verified(&address) {
                    info!("Verified identity {}", address.short());
                    state.ledger.add_verified_identity(address);
                }
                Ok(())
            }
            Event::NewWallet { address } => {
                let mut state = self.state.lock().await;
                state.ledger.create_account(&address, 0);
                Ok(())
            }
        }
    }

    async fn on_transaction(&self, tx: Transaction) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        let NodeState {
            ledger, mempool, ..
        } = &mut *state;
        match mempool.admit(tx, ledger, self.min_fee) {
            Ok(digest) => {
                info!("Transaction {} added to mempool", digest.short());
                drop(state);
                self.tick(now_millis()).await;
            }
            Err(AdmissionError::DuplicateTransaction(digest)) => {
                debug!("Transaction {} already pending or confirmed", digest.short());
            }
            Err(e) => warn!("Rejected transaction: {e}"),
        }
        Ok(())
    }

    async fn on_block(&self, block: Block) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        match self
            .selector
            .check_foreign_block(&state.ledger, &block, now_millis())
        {
            Ok(()) => {}
            Err(ProposerError::PreviousHashMismatch { expected, actual }) => {
                warn!(
                    "Block {} builds on {}, local head is {}; requesting sync",
                    block.hash.short(),
                    actual.short(),
                    expected.short()
                );
                state.ibd.request(false);
                drop(state);
                return self.broadcast(Event::IbdRequest { force_sync: false }).await;
            }
            Err(e) => {
                warn!("Rejected block {}: {e}", block.hash.short());
                return Ok(());
            }
        }

        match state.ledger.accept_block(block.clone()) {
            Ok(receipt) => {
                state.mempool.remove_confirmed(&block);
                info!(
                    "Accepted block {} at height {} ({} applied, {} skipped)",
                    block.hash.short(),
                    state.ledger.height(),
                    receipt.applied,
                    receipt.skipped.len()
                );
                if !receipt.reward_minted {
                    warn!("Supply cap reached, block reward withheld");
                }
                self.persist(&state).await?;
                Ok(())
            }
            Err(e) => {
                warn!("Rejected block {}: {e}", block.hash.short());
                Ok(())
            }
        }
    }

    async fn on_genesis(&self, block: Block, state: Option<Vec<u8>>) -> Result<(), ServerError> {
        let mut guard = self.state.lock().await;
        if guard.ledger.height() > 0 {
            warn!(
                "Rejected genesis seed: local chain is at height {}",
                guard.ledger.height()
            );
            return Ok(());
        }
        if !block.is_genesis() {
            warn!("Rejected genesis seed {}: has a parent", block.hash.short());
            return Ok(());
        }
        let seeded = match state {
            Some(bytes) => match decode_state(&bytes) {
                Ok(seeded) => seeded,
                Err(e) => {
                    warn!("Rejected genesis seed: {e}");
                    return Ok(());
                }
            },
            None => LedgerState {
                chain: vec![block.clone()],
                accounts: Default::default(),
                banned_addresses: Vec::new(),
                current_supply: 0,
            },
        };
        if !seeded.is_valid() || seeded.chain.first() != Some(&block) {
            warn!("Rejected genesis seed {}: invalid state", block.hash.short());
            return Ok(());
        }
        guard.ledger.load_state(seeded)?;
        info!(
            "Installed genesis {} with {} accounts",
            block.hash.short(),
            guard.ledger.account_count()
        );
        self.persist(&guard).await?;
        Ok(())
    }

    async fn on_ibd_request(&self, from: String, force_sync: bool) -> Result<(), ServerError> {
        let snapshot = self.state.lock().await.ledger.serialize_state();
        let response = Event::ibd_response(&snapshot, force_sync)
            .map_err(|e| ServerError::Encoding(e.to_string()))?;
        debug!("Sending state at height {} to {from}", snapshot.len() - 1);
        self.transport.send_message(from, response.to_bytes()).await?;
        Ok(())
    }

    async fn on_ibd_response(
        &self,
        from: String,
        bytes: Vec<u8>,
        force_sync: bool,
    ) -> Result<(), ServerError> {
        let peer_state = match decode_state(&bytes) {
            Ok(peer_state) => peer_state,
            Err(e) => {
                warn!("Malformed state from {from}: {e}");
                return Ok(());
            }
        };
        let mut state = self.state.lock().await;
        match state.ibd.on_response(from.clone(), peer_state, force_sync) {
            IbdAction::OpenWindow {
                window_id,
                close_in_ms,
            } => {
                info!("Collecting chain states for {close_in_ms}ms");
                let timer = self.window_tx.clone();
                tokio::spawn(async move {
                    sleep(Duration::from_millis(close_in_ms)).await;
                    let _ = timer.send(window_id).await;
                });
            }
            IbdAction::Buffered { .. } => debug!("Buffered chain state from {from}"),
            IbdAction::ApplyNow { from, state: forced } => {
                info!("Force sync: adopting chain of {} blocks from {from}", forced.len());
                self.adopt(&mut state, forced).await?;
            }
            IbdAction::Ignored(IgnoreReason::InvalidChain) => {
                warn!("Discarded invalid chain from {from}");
            }
            IbdAction::Ignored(IgnoreReason::Unsolicited) => {
                debug!("Ignored unsolicited state from {from}");
            }
        }
        Ok(())
    }

    /// Resolves the collection window `window_id` if it is still current.
    pub async fn close_ibd_window(&self, window_id: u64) {
        let mut state = self.state.lock().await;
        let local = state.ledger.serialize_state();
        match state.ibd.close_window(window_id, &local) {
            Some(IbdOutcome::Adopt {
                from,
                state: winner,
                considered,
                discarded,
            }) => {
                info!(
                    "Sync: adopting chain of {} blocks from {from} ({considered} candidates, {discarded} invalid)",
                    winner.len()
                );
                if let Err(e) = self.adopt(&mut state, winner).await {
                    error!("Sync failed: {e}");
                }
            }
            Some(IbdOutcome::KeepLocal {
                considered,
                discarded,
            }) => info!(
                "Sync: local chain kept ({considered} candidates, {discarded} invalid)"
            ),
            None => debug!("Window {window_id} already closed"),
        }
    }

    async fn adopt(
        &self,
        state: &mut MutexGuard<'_, NodeState>,
        winner: LedgerState,
    ) -> Result<(), ServerError> {
        state.ledger.load_state(winner)?;
        let NodeState {
            ledger, mempool, ..
        } = &mut **state;
        for block in ledger.chain() {
            mempool.remove_confirmed(block);
        }
        self.persist(&**state).await
    }

    /// Slot announcement and block production check; driven by the ticker.
    pub async fn tick(&self, now: u64) {
        match self.try_produce_block(now).await {
            Ok(Some(block)) => {
                let event = Event::NewBlock {
                    block,
                    genesis: false,
                    state: None,
                };
                if let Err(e) = self.broadcast(event).await {
                    warn!("Block broadcast failed: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => error!("Block production failed: {e}"),
        }
    }

    /// Produces, applies and persists a block if this node owns the slot at
    /// `now` and a full batch is waiting. The caller broadcasts it.
    pub async fn try_produce_block(&self, now: u64) -> Result<Option<Block>, ServerError> {
        let mut state = self.state.lock().await;
        let slot = self.selector.params().slot(now);
        let ours = self.selector.proposer_for_slot(&state.ledger, slot) == self.address;
        if ours && state.announced_slot != Some(slot) {
            state.announced_slot = Some(slot);
            let announce = Event::SelectedProposer {
                proposer: self.address.clone(),
                slot,
            };
            if let Err(e) = self.transport.broadcast(announce.to_bytes()).await {
                debug!("Slot announcement failed: {e}");
            }
        }
        if state.ibd.is_collecting() {
            return Ok(None);
        }
        let has_full_batch = state.mempool.has_full_batch();
        if let Some(skip) = self
            .selector
            .production_blocker(&state.ledger, now, has_full_batch)
        {
            if has_full_batch {
                debug!("Not producing: {skip}");
            }
            return Ok(None);
        }
        let Some(batch) = state.mempool.full_batch() else {
            return Ok(None);
        };
        let transactions = batch.transactions.clone();

        let block = state.ledger.build_block(transactions, &self.key, now)?;
        let receipt = state.ledger.accept_block(block.clone())?;
        state.mempool.remove_confirmed(&block);
        info!(
            "Produced block {} at height {} ({} transactions, {} fees)",
            block.hash.short(),
            state.ledger.height(),
            receipt.applied,
            receipt.fees
        );
        self.persist(&state).await?;
        Ok(Some(block))
    }

    async fn persist(&self, state: &NodeState) -> Result<(), ServerError> {
        if let Some(store) = &self.store {
            store.save(&state.ledger.serialize_state()).await?;
        }
        Ok(())
    }

    async fn broadcast(&self, event: Event) -> Result<(), ServerError> {
        self.transport.broadcast(event.to_bytes()).await?;
        Ok(())
    }

    /// Admits a signed transaction locally and gossips it.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash, ServerError> {
        let digest = {
            let mut state = self.state.lock().await;
            let NodeState {
                ledger, mempool, ..
            } = &mut *state;
            mempool.admit(tx.clone(), ledger, self.min_fee)?
        };
        info!("Transaction {} submitted", digest.short());
        if let Err(e) = self.broadcast(Event::NewTransaction(tx)).await {
            warn!("Transaction gossip failed: {e}");
        }
        self.tick(now_millis()).await;
        Ok(digest)
    }

    pub async fn balance(&self, address: &Address) -> u64 {
        self.state.lock().await.ledger.balance(address)
    }

    /// Asks every peer for its state. A forced sync applies the first valid
    /// answer; otherwise answers are collected and the longest chain wins.
    pub async fn request_sync(&self, force_sync: bool) -> Result<(), ServerError> {
        self.state.lock().await.ibd.request(force_sync);
        info!("Requesting chain state from peers (force={force_sync})");
        self.broadcast(Event::IbdRequest { force_sync }).await
    }

    /// Forced sync against a single peer.
    pub async fn force_sync_from(&self, peer: String) -> Result<(), ServerError> {
        self.state.lock().await.ibd.request(true);
        info!("Requesting forced sync from {peer}");
        let event = Event::IbdRequest { force_sync: true };
        self.transport.send_message(peer, event.to_bytes()).await?;
        Ok(())
    }

    /// Credits an initial distribution on a genesis-only chain and seeds
    /// peers with it.
    pub async fn create_genesis(
        &self,
        distribution: Vec<(Address, u64)>,
    ) -> Result<Block, ServerError> {
        let (genesis, snapshot) = {
            let mut state = self.state.lock().await;
            state.ledger.seed_genesis(&distribution)?;
            self.persist(&state).await?;
            (state.ledger.chain()[0].clone(), state.ledger.serialize_state())
        };
        info!("Genesis seeded with {} allocations", distribution.len());
        let event = Event::genesis_block(genesis.clone(), Some(&snapshot))
            .map_err(|e| ServerError::Encoding(e.to_string()))?;
        if let Err(e) = self.broadcast(event).await {
            warn!("Genesis broadcast failed: {e}");
        }
        Ok(genesis)
    }

    /// Pays the identity fee to the master address and announces this node
    /// as a proposer candidate.
    pub async fn register_identity(&self) -> Result<Hash, ServerError> {
        let rules = self.state.lock().await.ledger.rules().clone();
        let mut tx = Transaction::new(
            self.address.clone(),
            rules.master_address,
            rules.identity_fee,
            self.min_fee,
        );
        tx.sign(&self.key)?;
        let digest = self.submit_transaction(tx).await?;
        self.state
            .lock()
            .await
            .ledger
            .add_verified_identity(self.address.clone());
        let event = Event::NewIdentity {
            address: self.address.clone(),
        };
        if let Err(e) = self.broadcast(event).await {
            warn!("Identity broadcast failed: {e}");
        }
        Ok(digest)
    }

    /// Generates a key, opens its account and announces it. The caller owns
    /// the returned key.
    pub async fn create_wallet(&self) -> PrivateKey {
        let key = PrivateKey::new();
        let address = key.address();
        self.state.lock().await.ledger.create_account(&address, 0);
        info!("Created wallet {}", address.short());
        if let Err(e) = self.broadcast(Event::NewWallet { address }).await {
            warn!("Wallet broadcast failed: {e}");
        }
        key
    }

    pub async fn chain_info(&self) -> ChainInfo {
        let state = self.state.lock().await;
        ChainInfo {
            height: state.ledger.height(),
            latest_hash: state.ledger.latest_block().hash,
            accounts: state.ledger.account_count(),
            current_supply: state.ledger.current_supply(),
            block_reward: state.ledger.current_block_reward(),
            min_transaction_fee: self.min_fee,
            pending_transactions: state.mempool.len(),
            verified_identities: state.ledger.verified_identities().count(),
        }
    }

    pub async fn find_transaction(&self, digest: &Hash) -> Option<TransactionStatus> {
        let state = self.state.lock().await;
        if let Some(location) = state.ledger.find_transaction(digest) {
            return Some(TransactionStatus::Confirmed(location));
        }
        state
            .mempool
            .find(digest)
            .cloned()
            .map(TransactionStatus::Pending)
    }

    pub async fn address_status(&self, address: &Address) -> AddressStatus {
        if self.state.lock().await.ledger.is_address_banned(address) {
            AddressStatus::Banned
        } else {
            AddressStatus::Active
        }
    }

    /// Drops the chain, accounts, mempool and any sync in progress.
    pub async fn reset(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        state.ledger.reset();
        state.mempool.flush();
        state.ibd.abandon();
        warn!("Ledger reset to genesis");
        self.persist(&state).await
    }

    pub async fn ledger_state(&self) -> LedgerState {
        self.state.lock().await.ledger.serialize_state()
    }

    pub async fn height(&self) -> u64 {
        self.state.lock().await.ledger.height()
    }
}

impl<T: Transport> RpcProcessor for Server<T> {
    type Error = ServerError;

    fn process_message(
        self: Arc<Self>,
        decoded: DecodedMessage,
    ) -> BoxFuture<'static, Result<(), ServerError>> {
        Box::pin(async move { self.handle_event(decoded.from, decoded.event).await })
    }
}
