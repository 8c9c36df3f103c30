//! Agent configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::{AgentError, AgentResult};

/// Default server address.
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Default seconds between reports.
pub const DEFAULT_REPORT_INTERVAL: u64 = 10;

/// Default seconds between samples.
pub const DEFAULT_POLL_INTERVAL: u64 = 2;

/// Default number of concurrent deliveries.
pub const DEFAULT_RATE_LIMIT: usize = 10;

/// Command-line flags. Every flag can also come from its environment variable.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "tally-agent", about = "Metrics agent", version)]
pub struct Args {
    /// HTTP server address.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// RPC server address; when set, metrics go over RPC instead of HTTP.
    #[arg(short = 'g', long = "rpc-address", env = "RPC_ADDRESS")]
    pub rpc_address: Option<String>,

    /// Seconds between reports.
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Seconds between samples.
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// HMAC-SHA256 key.
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Maximum concurrent deliveries.
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// Path to the server's RSA public key.
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,
}

/// Shape of the JSON configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// HTTP server address.
    pub address: Option<String>,
    /// RPC server address.
    pub rpc_address: Option<String>,
    /// Seconds between reports.
    pub report_interval: Option<u64>,
    /// Seconds between samples.
    pub poll_interval: Option<u64>,
    /// HMAC key.
    pub hash_key: Option<String>,
    /// Maximum concurrent deliveries.
    pub rate_limit: Option<usize>,
    /// RSA public key path.
    pub crypto_key: Option<PathBuf>,
}

impl FileConfig {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Resolved agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// HTTP server address.
    pub address: String,
    /// RPC server address, if RPC delivery is used.
    pub rpc_address: Option<String>,
    /// Time between reports.
    pub report_interval: Duration,
    /// Time between samples.
    pub poll_interval: Duration,
    /// HMAC key.
    pub hash_key: Option<String>,
    /// Maximum concurrent deliveries.
    pub rate_limit: usize,
    /// RSA public key path.
    pub crypto_key: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl AgentConfig {
    /// Creates a configuration with default values reporting to `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            rpc_address: None,
            report_interval: Duration::from_secs(DEFAULT_REPORT_INTERVAL),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL),
            hash_key: None,
            rate_limit: DEFAULT_RATE_LIMIT,
            crypto_key: None,
        }
    }

    /// Resolves flags, environment and the optional config file.
    pub fn from_args(args: Args) -> AgentResult<Self> {
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
        if let Some(v) = file.report_interval {
            self.report_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.poll_interval {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.hash_key {
            self.hash_key = non_empty(v);
        }
        if let Some(v) = file.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = file.crypto_key {
            self.crypto_key = Some(v).filter(|p| !p.as_os_str().is_empty());
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
        if let Some(v) = args.report_interval {
            self.report_interval = Duration::from_secs(v);
        }
        if let Some(v) = args.poll_interval {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = args.key {
            self.hash_key = non_empty(v);
        }
        if let Some(v) = args.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = args.crypto_key {
            self.crypto_key = Some(v).filter(|p| !p.as_os_str().is_empty());
        }
        self
    }

    /// Rejects zero intervals and an empty address.
    pub fn validate(&self) -> AgentResult<()> {
        if self.address.trim().is_empty() && self.rpc_address.is_none() {
            return Err(AgentError::Config("address must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(AgentError::Config(
                "poll interval must be at least one second".to_string(),
            ));
        }
        if self.report_interval.is_zero() {
            return Err(AgentError::Config(
                "report interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the RPC server address.
    #[must_use]
    pub fn with_rpc_address(mut self, address: impl Into<String>) -> Self {
        self.rpc_address = Some(address.into());
        self
    }

    /// Set the report interval.
    #[must_use]
    pub const fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the HMAC key.
    #[must_use]
    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = Some(key.into());
        self
    }

    /// Set the concurrency limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, limit: usize) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Set the RSA public key path.
    #[must_use]
    pub fn with_crypto_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.crypto_key = Some(path.into());
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
