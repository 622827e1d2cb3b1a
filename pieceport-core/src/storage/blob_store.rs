use crate::error::{PieceError, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

/// Filesystem store for padded piece bytes, keyed by piece CID.
/// Blobs live at `blobs/{prefix}/{key}` where prefix is the last two
/// characters of the key (CID prefixes are all identical).
pub struct FileBlobStore {
    base_path: PathBuf,
}

impl FileBlobStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Store a blob. Existing blobs with the same key are left untouched,
    /// since the key is derived from the content. Returns whether this call
    /// wrote the blob.
    pub async fn put(&self, key: &str, data: Bytes) -> Result<bool> {
        let blob_path = self.blob_path(key)?;

        if blob_path.exists() {
            return Ok(false);
        }

        if let Some(dir) = blob_path.parent() {
            fs::create_dir_all(dir).await?;
        }

        // Each writer gets its own temp file; concurrent puts of one key must
        // never truncate each other.
        let temp_path = blob_path.with_file_name(format!("{}.{}.tmp", key, Ulid::new()));
        if let Err(e) = write_file(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if blob_path.exists() {
            fs::remove_file(&temp_path).await?;
            return Ok(false);
        }
        fs::rename(&temp_path, &blob_path).await?;

        tracing::debug!(key = %key, bytes = data.len(), "stored blob");
        Ok(true)
    }

    /// Read a blob; a missing key is `PieceNotFound`.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let blob_path = self.blob_path(key)?;

        if !blob_path.exists() {
            return Err(PieceError::PieceNotFound(format!("blob {}", key)));
        }

        let data = fs::read(&blob_path).await?;
        Ok(Bytes::from(data))
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PieceError::Validation(format!("invalid blob key: {:?}", key)));
        }

        let prefix = &key[key.len().saturating_sub(2)..];
        Ok(self.base_path.join("blobs").join(prefix).join(key))
    }
}

async fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
