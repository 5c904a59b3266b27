//! Configuration loading and validation
//!
//! The configuration is a JSON file. Missing required sections (backends,
//! TLS material, the client allow-list, the access control list) reject
//! the file at load time; the listen port and rate limiter settings carry
//! defaults.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default bucket capacity for newly seen clients
const DEFAULT_BUCKET_CAPACITY: u64 = 10;
/// Default bucket refill rate in tokens per second
const DEFAULT_BUCKET_REFILL_RATE: u64 = 2;

const fn default_port() -> u16 {
    3003
}

/// Rate limiting settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum number of tokens in a client's bucket
    pub capacity: u64,
    /// Tokens added to a bucket every second
    pub refill_rate: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUCKET_CAPACITY,
            refill_rate: DEFAULT_BUCKET_REFILL_RATE,
        }
    }
}

/// TLS material locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Server certificate file
    pub cert_file: PathBuf,
    /// Server private key file
    pub key_file: PathBuf,
    /// Root CA file used to verify client certificates
    pub ca_file: PathBuf,
}

/// Top-level application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port the server listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Backend addresses registered at startup
    pub backends: Vec<String>,
    /// Server identity and client trust anchor
    pub tls: TlsConfig,
    /// Default token bucket parameters
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    /// CommonName allow-list; a connecting client's CN must map to true
    pub allowed_clients: HashMap<String, bool>,
    /// Client ID to the backend addresses it may reach
    pub client_backend_acl: HashMap<String, Vec<String>>,
}

impl Config {
    /// Reject configurations with empty required sections
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            anyhow::bail!("backend service configuration is required");
        }
        if self.allowed_clients.is_empty() {
            anyhow::bail!("allowed clients list configuration is required");
        }
        if self.client_backend_acl.is_empty() {
            anyhow::bail!("access control list configuration is required");
        }
        Ok(())
    }

    /// Convert the ACL's per-client address lists into lookup sets
    #[must_use]
    pub fn acl_sets(&self) -> HashMap<String, HashSet<String>> {
        self.client_backend_acl
            .iter()
            .map(|(client_id, addresses)| {
                (client_id.clone(), addresses.iter().cloned().collect())
            })
            .collect()
    }
}

/// Load and validate the configuration from a JSON file
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("unable to open configuration file '{}'", path.display()))?;

    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("configuration parsing error for file '{}'", path.display()))?;

    config.validate()?;

    Ok(config)
}
