use super::{LedgerService, RootDescriptor, TransactionRecord};
use crate::{PieceError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ledger reached over its HTTP API.
#[derive(Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SubmitRootsRequest<'a> {
    roots: Vec<&'a RootDescriptor>,
}

#[derive(Debug, Deserialize)]
struct SubmitRootsResponse {
    tx_hash: String,
}

impl HttpLedger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(PieceError::Config(
                "ledger base url cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PieceError::Config(format!("failed to build ledger client: {}", e)))?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl LedgerService for HttpLedger {
    async fn submit_root(&self, proof_set_id: u64, root: &RootDescriptor) -> Result<String> {
        let url = format!("{}/proof-sets/{}/roots", self.base_url, proof_set_id);

        let response = self
            .client
            .post(&url)
            .json(&SubmitRootsRequest { roots: vec![root] })
            .send()
            .await
            .map_err(|e| PieceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PieceError::Ledger(format!(
                "root submission to proof set {} rejected: {} {}",
                proof_set_id,
                status,
                body.trim()
            )));
        }

        let payload: SubmitRootsResponse = response
            .json()
            .await
            .map_err(|e| PieceError::Ledger(format!("invalid submission response: {}", e)))?;

        if payload.tx_hash.trim().is_empty() {
            return Err(PieceError::Ledger(
                "ledger accepted submission without a transaction hash".to_string(),
            ));
        }

        Ok(payload.tx_hash)
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>> {
        let url = format!("{}/transactions/{}", self.base_url, tx_hash);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PieceError::Http(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record = response.json::<TransactionRecord>().await.map_err(|e| {
                    PieceError::Ledger(format!("invalid transaction record for {}: {}", tx_hash, e))
                })?;
                Ok(Some(record))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PieceError::Ledger(format!(
                    "transaction lookup for {} failed: {} {}",
                    tx_hash,
                    status,
                    body.trim()
                )))
            }
        }
    }
}
