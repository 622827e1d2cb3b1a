//! Contract with the external ledger that accepts proof-set root submissions
//! and owns transaction status. This crate only ever reads transaction
//! records; it never writes them.

pub mod http;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub confirmed_block: Option<i64>,
    #[serde(default)]
    pub confirmed_tx_hash: Option<String>,
    #[serde(default, with = "hex_receipt")]
    pub receipt: Option<Vec<u8>>,
}

impl TransactionRecord {
    pub fn pending(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            status: TransactionStatus::Pending,
            success: None,
            confirmed_block: None,
            confirmed_tx_hash: None,
            receipt: None,
        }
    }

    pub fn confirmed(hash: impl Into<String>, success: bool, block: i64) -> Self {
        Self {
            status: TransactionStatus::Confirmed,
            success: Some(success),
            confirmed_block: Some(block),
            ..Self::pending(hash)
        }
    }
}

/// A proof-set root: the commitment-derived root identifier and the piece
/// CIDs it is made of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDescriptor {
    pub root_cid: String,
    pub subroot_cids: Vec<String>,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Submit a root to a proof set, returning the transaction hash.
    async fn submit_root(&self, proof_set_id: u64, root: &RootDescriptor) -> Result<String>;

    /// Look up a transaction. `None` means the ledger has not indexed it yet.
    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>>;
}

mod hex_receipt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&format!("0x{}", hex::encode(bytes))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        match value {
            Some(text) => {
                let trimmed = text.strip_prefix("0x").unwrap_or(&text);
                hex::decode(trimmed)
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
            None => Ok(None),
        }
    }
}
