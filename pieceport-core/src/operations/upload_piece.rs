use crate::commitment::compute_commitment;
use crate::{FileBlobStore, Piece, PieceError, PieceLocks, PieceStatus, PieceStore, Result};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct UploadPieceOperation {
    store: Arc<PieceStore>,
    blobs: Arc<FileBlobStore>,
    locks: Arc<PieceLocks>,
}

pub struct UploadPieceOperationRequest {
    pub piece_id: String,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UploadPieceOperationResult {
    pub piece: Piece,
    /// False when the padded bytes were already in the blob store.
    pub blob_written: bool,
}

impl UploadPieceOperation {
    pub fn new(store: Arc<PieceStore>, blobs: Arc<FileBlobStore>, locks: Arc<PieceLocks>) -> Self {
        Self {
            store,
            blobs,
            locks,
        }
    }

    pub async fn run(&self, request: UploadPieceOperationRequest) -> Result<UploadPieceOperationResult> {
        let UploadPieceOperationRequest { piece_id, body } = request;

        let _guard = self.locks.lock(&piece_id).await;

        let mut piece = self
            .store
            .get(&piece_id)?
            .ok_or_else(|| PieceError::PieceNotFound(piece_id.clone()))?;

        if piece.status != PieceStatus::Prepared {
            return Err(PieceError::Conflict(format!(
                "piece {} was already uploaded (status {})",
                piece_id, piece.status
            )));
        }

        if body.is_empty() {
            return Err(PieceError::Validation(
                "piece content cannot be empty".to_string(),
            ));
        }

        let raw_size = body.len() as u64;
        if let Some(declared) = piece.raw_size {
            if declared != raw_size {
                return Err(PieceError::Validation(format!(
                    "piece {} declared {} bytes but {} were uploaded",
                    piece_id, declared, raw_size
                )));
            }
        }

        let committed = tokio::task::spawn_blocking(move || compute_commitment(body))
            .await
            .map_err(|e| PieceError::Internal(format!("commitment task failed: {}", e)))??;

        if let Some(existing) = self.store.get_by_content_id(&committed.content_id)? {
            return Err(PieceError::Conflict(format!(
                "content {} is already held by piece {}",
                committed.content_id, existing.id
            )));
        }

        let blob_written = self
            .blobs
            .put(&committed.content_id, committed.padded.clone())
            .await?;

        piece.raw_size = Some(raw_size);
        piece.padded_size = Some(committed.padded_size);
        piece.piece_size = Some(committed.commitment.piece_size);
        piece.commitment_digest = Some(committed.commitment.digest_hex());
        piece.content_id = Some(committed.content_id.clone());
        piece.transition(PieceStatus::Uploaded, "upload")?;

        if !self.store.update(&piece, PieceStatus::Prepared)? {
            return Err(PieceError::Conflict(format!(
                "piece {} changed during upload",
                piece_id
            )));
        }

        tracing::info!(
            piece_id = %piece.id,
            content_id = %committed.content_id,
            raw_size,
            padded_size = committed.padded_size,
            blob_written,
            "uploaded piece"
        );

        Ok(UploadPieceOperationResult {
            piece,
            blob_written,
        })
    }

    /// Upload a piece that was prepared from a file, reading the file now.
    pub async fn run_from_source(&self, piece_id: &str) -> Result<UploadPieceOperationResult> {
        let piece = self
            .store
            .get(piece_id)?
            .ok_or_else(|| PieceError::PieceNotFound(piece_id.to_string()))?;

        let path = piece.source_path.ok_or_else(|| {
            PieceError::Validation(format!("piece {} has no source file", piece_id))
        })?;

        let body = tokio::fs::read(&path).await.map_err(|e| {
            PieceError::Validation(format!("cannot read source file {}: {}", path.display(), e))
        })?;

        self.run(UploadPieceOperationRequest {
            piece_id: piece_id.to_string(),
            body: Bytes::from(body),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Stores, stores};

    fn operation(stores: &Stores) -> UploadPieceOperation {
        UploadPieceOperation::new(
            stores.pieces.clone(),
            stores.blobs.clone(),
            stores.locks.clone(),
        )
    }

    fn prepared(stores: &Stores, id: &str, raw_size: Option<u64>) -> Piece {
        let piece = Piece::prepared(id.to_string(), None, raw_size);
        stores.pieces.create(&piece).unwrap();
        piece
    }

    fn request(piece_id: &str, body: &'static [u8]) -> UploadPieceOperationRequest {
        UploadPieceOperationRequest {
            piece_id: piece_id.to_string(),
            body: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn test_upload_pads_and_commits() {
        let stores = stores();
        prepared(&stores, "p1", Some(11));

        let result = operation(&stores)
            .run(request("p1", b"hello world"))
            .await
            .unwrap();
        let piece = result.piece;

        assert!(result.blob_written);
        assert_eq!(piece.status, PieceStatus::Uploaded);
        assert_eq!(piece.raw_size, Some(11));
        assert_eq!(piece.padded_size, Some(16));
        assert_eq!(piece.piece_size, Some(128));
        assert_eq!(
            piece.content_id.as_deref(),
            Some("baga6ea4seaqo4xahwtvbmhunywt2yhzjebhylq4yei73dmrzu7bky4lnev6ukgq")
        );

        let stored = stores.pieces.get("p1").unwrap().unwrap();
        assert_eq!(stored, piece);

        let blob = stores.blobs.get(piece.content_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(blob.len(), 16);
        assert_eq!(&blob[..11], b"hello world");
        assert!(blob[11..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_upload_errors() {
        let stores = stores();
        let op = operation(&stores);
        prepared(&stores, "sized", Some(4));
        prepared(&stores, "open", None);

        let err = op.run(request("missing", b"abc")).await.unwrap_err();
        assert!(matches!(err, PieceError::PieceNotFound(_)));

        let err = op.run(request("open", b"")).await.unwrap_err();
        assert!(matches!(err, PieceError::Validation(_)));

        let err = op.run(request("sized", b"abc")).await.unwrap_err();
        assert!(matches!(err, PieceError::Validation(_)));

        op.run(request("open", b"abc")).await.unwrap();
        let err = op.run(request("open", b"abc")).await.unwrap_err();
        assert!(matches!(err, PieceError::Conflict(_)));

        let sized = stores.pieces.get("sized").unwrap().unwrap();
        assert_eq!(sized.status, PieceStatus::Prepared);
    }

    #[tokio::test]
    async fn test_duplicate_content_is_rejected() {
        let stores = stores();
        let op = operation(&stores);
        prepared(&stores, "first", None);
        prepared(&stores, "second", None);

        op.run(request("first", b"same bytes")).await.unwrap();
        let err = op.run(request("second", b"same bytes")).await.unwrap_err();
        assert!(matches!(err, PieceError::Conflict(_)));

        let second = stores.pieces.get("second").unwrap().unwrap();
        assert_eq!(second.status, PieceStatus::Prepared);
        assert!(second.content_id.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_content_is_a_conflict() {
        let stores = stores();
        let op = operation(&stores);
        let body = Bytes::from(vec![0x42u8; 1 << 20]);

        for round in 0..3 {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let id = format!("r{}-{}", round, i);
                    prepared(&stores, &id, None);
                    let op = op.clone();
                    let body = body.clone();
                    tokio::spawn(async move {
                        op.run(UploadPieceOperationRequest { piece_id: id, body }).await
                    })
                })
                .collect();

            let mut uploaded = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => uploaded += 1,
                    Err(e) => assert!(matches!(e, PieceError::Conflict(_)), "{}", e),
                }
            }
            // Only the first round can claim the content.
            assert_eq!(uploaded, if round == 0 { 1 } else { 0 });
        }

        let holders = stores
            .pieces
            .list(100)
            .unwrap()
            .into_iter()
            .filter(|p| p.status == PieceStatus::Uploaded)
            .count();
        assert_eq!(holders, 1);
    }

    #[tokio::test]
    async fn test_upload_from_source() {
        let stores = stores();
        let path = stores.dir.path().join("source.bin");
        std::fs::write(&path, vec![7u8; 1024]).unwrap();

        let piece = Piece::prepared("file".to_string(), Some(path), Some(1024));
        stores.pieces.create(&piece).unwrap();

        let op = operation(&stores);
        let piece = op.run_from_source("file").await.unwrap().piece;
        assert_eq!(piece.status, PieceStatus::Uploaded);
        assert_eq!(piece.padded_size, Some(1024));

        prepared(&stores, "declared", None);
        let err = op.run_from_source("declared").await.unwrap_err();
        assert!(matches!(err, PieceError::Validation(_)));
    }
}
