use crate::ledger::{LedgerService, RootDescriptor, TransactionRecord};
use crate::{FileBlobStore, PieceError, PieceLocks, PieceStore, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// In-memory ledger. Submissions get sequential hashes; records are set by
/// the test.
#[derive(Default)]
pub struct FakeLedger {
    records: Mutex<HashMap<String, TransactionRecord>>,
    submissions: Mutex<Vec<(u64, RootDescriptor)>>,
    reject_with: Mutex<Option<String>>,
    lookup_delay: Mutex<Option<Duration>>,
    fail_lookups: AtomicBool,
    lookups: AtomicUsize,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_record(&self, record: TransactionRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.hash.clone(), record);
    }

    pub fn reject_submissions(&self, reason: &str) {
        *self.reject_with.lock().unwrap() = Some(reason.to_string());
    }

    pub fn delay_lookups(&self, delay: Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<(u64, RootDescriptor)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerService for FakeLedger {
    async fn submit_root(&self, proof_set_id: u64, root: &RootDescriptor) -> Result<String> {
        if let Some(reason) = self.reject_with.lock().unwrap().clone() {
            return Err(PieceError::Ledger(reason));
        }

        let mut submissions = self.submissions.lock().unwrap();
        submissions.push((proof_set_id, root.clone()));
        Ok(format!("0x{:064x}", submissions.len()))
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let delay = *self.lookup_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(PieceError::Ledger("ledger unreachable".to_string()));
        }

        Ok(self.records.lock().unwrap().get(tx_hash).cloned())
    }
}

pub struct Stores {
    pub dir: TempDir,
    pub pieces: Arc<PieceStore>,
    pub blobs: Arc<FileBlobStore>,
    pub locks: Arc<PieceLocks>,
}

pub fn stores() -> Stores {
    let dir = tempfile::tempdir().unwrap();
    let pieces = Arc::new(PieceStore::new(dir.path().join("pieces.db")).unwrap());
    let blobs = Arc::new(FileBlobStore::new(dir.path().join("blobs")).unwrap());
    Stores {
        dir,
        pieces,
        blobs,
        locks: Arc::new(PieceLocks::new()),
    }
}
