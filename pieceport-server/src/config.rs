use pieceport_core::{DEFAULT_RECONCILE_INTERVAL, DEFAULT_SECTOR_SIZE, PieceError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub proof: ProofConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Largest request body accepted, piece uploads included.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_upload_bytes() -> usize {
    256 << 20
}

/// Piece database and blob directory both live under `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("pieces.db")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub base_url: String,
    #[serde(default = "default_ledger_timeout_secs")]
    pub timeout_secs: u64,
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_ledger_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    DEFAULT_RECONCILE_INTERVAL.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            sector_size: default_sector_size(),
        }
    }
}

fn default_sector_size() -> u64 {
    DEFAULT_SECTOR_SIZE
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(path, environment())
    }

    fn load(path: &str, env: ::config::Environment) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(env)
            .build()
            .map_err(|e| PieceError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| PieceError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ledger.base_url.trim().is_empty() {
            return Err(PieceError::Config("ledger.base_url is required".to_string()));
        }
        if self.ledger.timeout_secs == 0 {
            return Err(PieceError::Config(
                "ledger.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(PieceError::Config(
                "server.max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.reconciler.interval_secs == 0 {
            return Err(PieceError::Config(
                "reconciler.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `PIECEPORT__RECONCILER__INTERVAL_SECS=5` overrides `reconciler.interval_secs`.
fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix("PIECEPORT")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().to_string()
    }

    fn no_env() -> ::config::Environment {
        environment().source(Some(HashMap::new()))
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "ledger:\n  base_url: http://ledger:9000\n");

        let config = Config::load(&path, no_env()).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.server.max_upload_bytes, 256 << 20);
        assert_eq!(config.ledger.timeout(), Duration::from_secs(30));
        assert!(config.reconciler.enabled);
        assert_eq!(config.reconciler.interval(), Duration::from_secs(10));
        assert_eq!(config.proof.sector_size, 64 << 30);
        assert_eq!(config.storage.db_path(), PathBuf::from("./data/pieces.db"));
    }

    #[test]
    fn test_file_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "server:\n  bind_addr: \"127.0.0.1:9100\"\n  max_upload_bytes: 1048576\n\
             storage:\n  data_dir: /var/lib/pieceport\n\
             ledger:\n  base_url: http://ledger:9000\n  timeout_secs: 5\n\
             reconciler:\n  enabled: false\n",
        );

        let env = environment().source(Some(HashMap::from([(
            "PIECEPORT__RECONCILER__INTERVAL_SECS".to_string(),
            "42".to_string(),
        )])));

        let config = Config::load(&path, env).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9100");
        assert_eq!(config.server.max_upload_bytes, 1 << 20);
        assert_eq!(config.storage.blob_dir(), PathBuf::from("/var/lib/pieceport/blobs"));
        assert_eq!(config.ledger.timeout_secs, 5);
        assert!(!config.reconciler.enabled);
        assert_eq!(config.reconciler.interval_secs, 42);
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_config(&dir, "server:\n  bind_addr: 127.0.0.1:1\n");
        assert!(matches!(Config::load(&path, no_env()), Err(PieceError::Config(_))));

        let path = write_config(
            &dir,
            "ledger:\n  base_url: http://ledger\nreconciler:\n  interval_secs: 0\n",
        );
        assert!(matches!(Config::load(&path, no_env()), Err(PieceError::Config(_))));

        let path = write_config(
            &dir,
            "server:\n  max_upload_bytes: 0\nledger:\n  base_url: http://ledger\n",
        );
        assert!(matches!(Config::load(&path, no_env()), Err(PieceError::Config(_))));
    }
}
