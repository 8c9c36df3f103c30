//! Server configuration.
//!
//! Values are layered: built-in defaults, then the JSON file named by
//! `-c`/`CONFIG`, then command-line flags and environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::{ServerError, ServerResult};

/// Default HTTP listen address.
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default snapshot period.
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);

/// Default snapshot directory.
pub const DEFAULT_FILE_STORAGE_PATH: &str = "./backups";

/// Command-line flags. Every flag can also come from its environment variable.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "tally-server", about = "Metrics collector server", version)]
pub struct Args {
    /// HTTP listen address.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// RPC (WebSocket) listen address; RPC is disabled when unset.
    #[arg(short = 'g', long = "rpc-address", env = "RPC_ADDRESS")]
    pub rpc_address: Option<String>,

    /// Log level filter.
    #[arg(short = 'l', long = "log-level", env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Seconds between snapshots.
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Snapshot directory; empty disables file persistence.
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    /// Restore the latest snapshot on start.
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// PostgreSQL DSN; takes precedence over file persistence.
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// HMAC-SHA256 key.
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Path to the RSA private key.
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR block senders must belong to.
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// JSON configuration file.
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,
}

/// Shape of the JSON configuration file. Absent fields keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// HTTP listen address.
    pub address: Option<String>,
    /// RPC listen address.
    pub rpc_address: Option<String>,
    /// Log level.
    pub level: Option<String>,
    /// Seconds between snapshots.
    pub store_interval: Option<u64>,
    /// Snapshot directory.
    pub file_path: Option<String>,
    /// Restore on start.
    pub restore: Option<bool>,
    /// PostgreSQL DSN.
    pub database_address: Option<String>,
    /// HMAC key.
    pub hash_key: Option<String>,
    /// RSA private key path.
    pub crypto_key: Option<PathBuf>,
    /// Trusted CIDR block.
    pub trusted_subnet: Option<String>,
}

impl FileConfig {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Where the store is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    /// PostgreSQL at the given DSN.
    Database(String),
    /// Append-only snapshots in the given directory.
    File(PathBuf),
    /// Nothing survives a restart.
    Memory,
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub address: String,
    /// RPC listen address, if RPC is served.
    pub rpc_address: Option<String>,
    /// Log level filter.
    pub log_level: String,
    /// Persistence period.
    pub store_interval: Duration,
    /// Snapshot directory, if file persistence is on.
    pub file_storage_path: Option<PathBuf>,
    /// Whether to restore on start.
    pub restore: bool,
    /// PostgreSQL DSN.
    pub database_dsn: Option<String>,
    /// HMAC key.
    pub hash_key: Option<String>,
    /// RSA private key path.
    pub crypto_key: Option<PathBuf>,
    /// Trusted CIDR block.
    pub trusted_subnet: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl ServerConfig {
    /// Creates a configuration with default values listening on `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            rpc_address: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            store_interval: DEFAULT_STORE_INTERVAL,
            file_storage_path: Some(PathBuf::from(DEFAULT_FILE_STORAGE_PATH)),
            restore: true,
            database_dsn: None,
            hash_key: None,
            crypto_key: None,
            trusted_subnet: None,
        }
    }

    /// Resolves flags, environment and the optional config file.
    pub fn from_args(args: Args) -> ServerResult<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let config = Self::default().merge_file(file).merge_args(args);
        config.validate()?;
        Ok(config)
    }

    fn merge_file(mut self, file: FileConfig) -> Self {
        if let Some(v) = file.address {
            self.address = v;
        }
        if let Some(v) = file.rpc_address {
            self.rpc_address = non_empty(v);
        }
        if let Some(v) = file.level {
            self.log_level = v;
        }
        if let Some(v) = file.store_interval {
            self.store_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.file_path {
            self.file_storage_path = non_empty(v).map(PathBuf::from);
        }
        if let Some(v) = file.restore {
            self.restore = v;
        }
        if let Some(v) = file.database_address {
            self.database_dsn = non_empty(v);
        }
        if let Some(v) = file.hash_key {
            self.hash_key = non_empty(v);
        }
        if let Some(v) = file.crypto_key {
            self.crypto_key = Some(v).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(v) = file.trusted_subnet {
            self.trusted_subnet = non_empty(v);
        }
        self
    }

    fn merge_args(mut self, args: Args) -> Self {
        if let Some(v) = args.address {
            self.address = v;
        }
        if let Some(v) = args.rpc_address {
            self.rpc_address = non_empty(v);
        }
        if let Some(v) = args.log_level {
            self.log_level = v;
        }
        if let Some(v) = args.store_interval {
            self.store_interval = Duration::from_secs(v);
        }
        if let Some(v) = args.file_storage_path {
            self.file_storage_path = non_empty(v).map(PathBuf::from);
        }
        if let Some(v) = args.restore {
            self.restore = v;
        }
        if let Some(v) = args.database_dsn {
            self.database_dsn = non_empty(v);
        }
        if let Some(v) = args.key {
            self.hash_key = non_empty(v);
        }
        if let Some(v) = args.crypto_key {
            self.crypto_key = Some(v).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(v) = args.trusted_subnet {
            self.trusted_subnet = non_empty(v);
        }
        self
    }

    /// Checks values that would otherwise fail later at runtime.
    pub fn validate(&self) -> ServerResult<()> {
        if self.address.trim().is_empty() {
            return Err(ServerError::Config("address must not be empty".to_string()));
        }
        if self.store_interval.is_zero() {
            return Err(ServerError::Config(
                "store interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Persistence backend: database if a DSN is set, else file, else memory.
    #[must_use]
    pub fn storage(&self) -> StorageKind {
        if let Some(dsn) = &self.database_dsn {
            StorageKind::Database(dsn.clone())
        } else if let Some(path) = &self.file_storage_path {
            StorageKind::File(path.clone())
        } else {
            StorageKind::Memory
        }
    }

    /// Set the RPC listen address.
    #[must_use]
    pub fn with_rpc_address(mut self, address: impl Into<String>) -> Self {
        self.rpc_address = Some(address.into());
        self
    }

    /// Set the persistence period.
    #[must_use]
    pub const fn with_store_interval(mut self, interval: Duration) -> Self {
        self.store_interval = interval;
        self
    }

    /// Set the snapshot directory, or disable file persistence with `None`.
    #[must_use]
    pub fn with_file_storage_path(mut self, path: Option<PathBuf>) -> Self {
        self.file_storage_path = path;
        self
    }

    /// Set whether to restore on start.
    #[must_use]
    pub const fn with_restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Set the PostgreSQL DSN.
    #[must_use]
    pub fn with_database_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.database_dsn = Some(dsn.into());
        self
    }

    /// Set the HMAC key.
    #[must_use]
    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = Some(key.into());
        self
    }

    /// Set the RSA private key path.
    #[must_use]
    pub fn with_crypto_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.crypto_key = Some(path.into());
        self
    }

    /// Set the trusted subnet.
    #[must_use]
    pub fn with_trusted_subnet(mut self, cidr: impl Into<String>) -> Self {
        self.trusted_subnet = Some(cidr.into());
        self
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert!(config.restore);
        assert_eq!(config.storage(), StorageKind::File(PathBuf::from("./backups")));
    }

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from([
            "tally-server",
            "-a",
            "0.0.0.0:9090",
            "-i",
            "5",
            "-r",
            "false",
            "-k",
            "secret",
            "-t",
            "10.0.0.0/8",
        ])
        .unwrap();
        let config = ServerConfig::default().merge_args(args);

        assert_eq!(config.address, "0.0.0.0:9090");
        assert_eq!(config.store_interval, Duration::from_secs(5));
        assert!(!config.restore);
        assert_eq!(config.hash_key.as_deref(), Some("secret"));
        assert_eq!(config.trusted_subnet.as_deref(), Some("10.0.0.0/8"));
    }

    #[test]
    fn database_wins_over_file() {
        let config = ServerConfig::default().with_database_dsn("postgres://localhost/db");
        assert_eq!(
            config.storage(),
            StorageKind::Database("postgres://localhost/db".to_string())
        );
    }

    #[test]
    fn empty_path_means_memory() {
        let args = Args {
            file_storage_path: Some(String::new()),
            ..Args::default()
        };
        let config = ServerConfig::default().merge_args(args);
        assert_eq!(config.storage(), StorageKind::Memory);
    }

    #[test]
    fn zero_store_interval_is_rejected() {
        let config = ServerConfig::default().with_store_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"address":"file:1","store_interval":7,"hash_key":"from-file","restore":false}}"#
        )
        .unwrap();

        let args = Args {
            address: Some("flag:2".to_string()),
            config: Some(file.path().to_path_buf()),
            ..Args::default()
        };
        let config = ServerConfig::from_args(args).unwrap();

        assert_eq!(config.address, "flag:2");
        assert_eq!(config.store_interval, Duration::from_secs(7));
        assert_eq!(config.hash_key.as_deref(), Some("from-file"));
        assert!(!config.restore);
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let args = Args {
            config: Some(PathBuf::from("/definitely/not/here.json")),
            ..Args::default()
        };
        assert!(matches!(
            ServerConfig::from_args(args),
            Err(ServerError::Config(_))
        ));
    }
}
