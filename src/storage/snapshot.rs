//! On-disk ledger snapshot.
//!
//! The whole [`LedgerState`] is written as pretty JSON to
//! `<data_dir>/blockchain.json`. A save keeps the previous file as
//! `blockchain.json.bak`, writes `blockchain.json.tmp` and renames it over the
//! target. The data directory is held under an exclusive lock file for the
//! lifetime of the store.

use crate::core::ledger::{Ledger, LedgerRules, LedgerState};
use crate::{info, warn};
use fs2::FileExt;
use stakechain_derive::Error;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "blockchain.json";
const LOCK_FILE: &str = "node.lock";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("persisted state is malformed: {0}")]
    MalformedPersistedState(String),
    #[error("data directory {0} is locked by another node")]
    Locked(String),
}

pub struct SnapshotStore {
    path: PathBuf,
    _lock: File,
}

impl SnapshotStore {
    /// Creates `data_dir` if needed and takes its lock.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, SnapshotError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let lock_path = data_dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| SnapshotError::Locked(data_dir.display().to_string()))?;
        Ok(Self {
            path: data_dir.join(SNAPSHOT_FILE),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` if nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<LedgerState>, SnapshotError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| SnapshotError::MalformedPersistedState(e.to_string()))
    }

    pub async fn save(&self, state: &LedgerState) -> Result<(), SnapshotError> {
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| SnapshotError::MalformedPersistedState(e.to_string()))?;
        if tokio::fs::try_exists(&self.path).await? {
            tokio::fs::copy(&self.path, self.path.with_extension("json.bak")).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Loads the persisted ledger, or a fresh genesis ledger if the snapshot
    /// is missing or unreadable, or fails [`LedgerState::is_valid`].
    pub async fn load_or_genesis(&self, rules: LedgerRules) -> Ledger {
        let state = match self.load().await {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!("No snapshot at {}, starting from genesis", self.path.display());
                return Ledger::new(rules);
            }
            Err(e) => {
                warn!("{e}; starting from genesis");
                return Ledger::new(rules);
            }
        };
        if !state.is_valid() {
            warn!(
                "Snapshot at {} holds an invalid chain or supply; starting from genesis",
                self.path.display()
            );
            return Ledger::new(rules.clone());
        }
        match Ledger::from_state(state, rules.clone()) {
            Ok(ledger) => {
                info!("Loaded chain at height {}", ledger.height());
                ledger
            }
            Err(e) => {
                warn!("{e}; starting from genesis");
                Ledger::new(rules)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::TOTAL_SUPPLY;
    use crate::crypto::key_pair::PrivateKey;
    use crate::utils::test_utils::ledger_with_blocks;

    #[tokio::test]
    async fn missing_snapshot_loads_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.load().await.unwrap().is_none());
        let ledger = store.load_or_genesis(LedgerRules::default()).await;
        assert_eq!(ledger.height(), 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let ledger = ledger_with_blocks(&PrivateKey::new(), 3);

        store.save(&ledger.serialize_state()).await.unwrap();
        store.save(&ledger.serialize_state()).await.unwrap();
        assert!(dir.path().join("blockchain.json.bak").exists());
        assert!(!dir.path().join("blockchain.json.tmp").exists());

        let loaded = store.load_or_genesis(LedgerRules::default()).await;
        assert_eq!(loaded.height(), 3);
        assert_eq!(loaded.chain(), ledger.chain());
    }

    #[tokio::test]
    async fn corrupt_snapshot_recovers_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        std::fs::write(store.path(), b"{ not json").unwrap();
        assert!(matches!(
            store.load().await,
            Err(SnapshotError::MalformedPersistedState(_))
        ));
        let ledger = store.load_or_genesis(LedgerRules::default()).await;
        assert_eq!(ledger.height(), 0);
    }

    #[tokio::test]
    async fn tampered_snapshot_recovers_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let ledger = ledger_with_blocks(&PrivateKey::new(), 2);
        let mut state = ledger.serialize_state();
        state.chain[2].timestamp += 1;
        store.save(&state).await.unwrap();

        let loaded = store.load_or_genesis(LedgerRules::default()).await;
        assert_eq!(loaded.height(), 0);
    }

    #[tokio::test]
    async fn snapshot_above_supply_cap_recovers_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let mut state = ledger_with_blocks(&PrivateKey::new(), 2).serialize_state();
        state.current_supply = TOTAL_SUPPLY + 1;
        store.save(&state).await.unwrap();

        let loaded = store.load_or_genesis(LedgerRules::default()).await;
        assert_eq!(loaded.height(), 0);
        assert_eq!(loaded.current_supply(), 0);
    }

    #[test]
    fn second_store_on_same_dir_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let _first = SnapshotStore::open(dir.path()).unwrap();
        assert!(matches!(
            SnapshotStore::open(dir.path()),
            Err(SnapshotError::Locked(_))
        ));
    }
}
