//! Pieceport Core - piece preparation and proof-set submission
//!
//! Takes raw data through its lifecycle up to confirmed inclusion in a proof set:
//! - Power-of-two padding and piece commitment (CommP) with CID encoding
//! - SQLite piece table with conditional, status-guarded updates
//! - Content-addressed blob storage for padded piece bytes
//! - Ledger submission and polling reconciliation of pending transactions

pub mod commitment;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod locks;
pub mod operations;
pub mod piece;
pub mod reconciler;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use commitment::{
    Commitment, CommittedPiece, CommPCalculator, compute_commitment, pad_to_power_of_two,
    unsealed_root,
};
pub use error::{ErrorKind, PieceError, Result};
pub use ledger::{HttpLedger, LedgerService, RootDescriptor, TransactionRecord, TransactionStatus};
pub use lifecycle::{DEFAULT_SECTOR_SIZE, LifecycleOptions, PieceManager};
pub use locks::PieceLocks;
pub use operations::{PieceSource, ReconcileOutcome, ReconcileReport};
pub use piece::{Piece, PieceStatus, PieceSummary};
pub use reconciler::{DEFAULT_RECONCILE_INTERVAL, ReconcilerHandle, TransactionReconciler};
pub use storage::{FileBlobStore, PieceStore};
