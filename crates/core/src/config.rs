//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage. Accepts `file://` copy sources.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage. Accepts `s3://bucket/key` copy sources.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key.
        secret_access_key: Option<String>,
        /// Force path-style URLs (required for MinIO). Defaults to false.
        #[serde(default)]
        force_path_style: bool,
    },
    /// In-process storage, lost on restart. Accepts `mem://` copy sources.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/assets"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket name".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            _ => Ok(()),
        }
    }

    /// Short name of the configured backend, for logs.
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::Filesystem { .. } => "filesystem",
            StorageConfig::S3 { .. } => "s3",
            StorageConfig::Memory => "memory",
        }
    }
}

/// Remote-copy ingestion configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Interval between copy-status polls in milliseconds (default: 50).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Key prefix of scratch slots (default: "scratch").
    #[serde(default = "default_scratch_prefix")]
    pub scratch_prefix: String,
    /// Extra extension -> MIME type mappings layered over the built-in table.
    #[serde(default)]
    pub mime_overrides: HashMap<String, String>,
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_scratch_prefix() -> String {
    "scratch".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            scratch_prefix: default_scratch_prefix(),
            mime_overrides: HashMap::new(),
        }
    }
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("ingest.poll_interval_ms cannot be 0".to_string());
        }
        if self.scratch_prefix.contains("..") || self.scratch_prefix.starts_with('/') {
            return Err(format!(
                "ingest.scratch_prefix must be a relative key prefix: {}",
                self.scratch_prefix
            ));
        }
        Ok(())
    }
}

/// Keyed client pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Lifetime of a pooled client in seconds, counted from creation (default: 1800).
    #[serde(default = "default_pool_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_pool_ttl_secs() -> u64 {
    30 * 60
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_pool_ttl_secs(),
        }
    }
}

impl PoolConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("pool.ttl_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Scheme relay connections use to reach a messaging endpoint.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelayTransport {
    /// TLS on port 443.
    #[default]
    Https,
    /// Plain HTTP, for local emulators and tests.
    Http,
}

impl RelayTransport {
    pub fn scheme(&self) -> &'static str {
        match self {
            RelayTransport::Https => "https",
            RelayTransport::Http => "http",
        }
    }
}

/// Topic relay configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Identifier attached to every sender (default: "ferry").
    #[serde(default = "default_sender_identifier")]
    pub sender_identifier: String,
    /// Connection transport.
    #[serde(default)]
    pub transport: RelayTransport,
    /// Bearer token presented when an action has no named key.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Lifetime of each shared access signature in seconds (default: 3600).
    #[serde(default = "default_sas_ttl_secs")]
    pub sas_ttl_secs: u64,
}

fn default_sender_identifier() -> String {
    "ferry".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_sas_ttl_secs() -> u64 {
    60 * 60
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sender_identifier: default_sender_identifier(),
            transport: RelayTransport::default(),
            bearer_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            sas_ttl_secs: default_sas_ttl_secs(),
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("sender_identifier", &self.sender_identifier)
            .field("transport", &self.transport)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("sas_ttl_secs", &self.sas_ttl_secs)
            .finish()
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sas_ttl(&self) -> Duration {
        Duration::from_secs(self.sas_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sender_identifier.trim().is_empty() {
            return Err("relay.sender_identifier cannot be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("relay.request_timeout_secs cannot be 0".to_string());
        }
        if self.sas_ttl_secs == 0 {
            return Err("relay.sas_ttl_secs cannot be 0".to_string());
        }
        if self
            .bearer_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            return Err("relay.bearer_token cannot be blank when set".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Remote-copy ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Client pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Topic relay configuration.
    #[serde(default)]
    pub relay: RelayConfig,
}

impl AppConfig {
    /// Create a test configuration backed by in-process storage.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            storage: StorageConfig::Memory,
            ..Self::default()
        }
    }

    /// Validate every section, reporting the first failure.
    pub fn validate(&self) -> crate::Result<()> {
        self.storage
            .validate()
            .and_then(|_| self.ingest.validate())
            .and_then(|_| self.pool.validate())
            .and_then(|_| self.relay.validate())
            .map_err(crate::Error::Config)
    }
}
