// Path: crates/types/src/config/mod.rs

//! Node configuration loaded from a TOML file.
use crate::app::{NodeId, Role};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration of one NDID node.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    /// The node's registered identifier.
    pub node_id: NodeId,
    /// The node's role.
    pub role: Role,
    /// Path of the on-disk orchestration store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Timeout applied when a create-request call does not specify one.
    #[serde(default = "default_request_timeout_secs")]
    pub default_request_timeout_secs: u64,
    /// RP: close a request automatically once it is completed.
    #[serde(default = "default_auto_close")]
    pub auto_close_on_completed: bool,
    /// Client callback delivery.
    #[serde(default)]
    pub callback: CallbackConfig,
    /// Ledger client behaviour.
    #[serde(default)]
    pub ledger: LedgerClientConfig,
    /// Peer message encoding.
    #[serde(default)]
    pub wire: WireConfig,
    /// Delegate signing to an HTTP service instead of a local key.
    #[serde(default)]
    pub external_signer: Option<ExternalSignerConfig>,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/ndid.redb")
}
fn default_request_timeout_secs() -> u64 {
    86_400
}
fn default_auto_close() -> bool {
    true
}

impl NodeConfig {
    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.as_str().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.callback.min_delay_ms == 0 || self.callback.min_delay_ms > self.callback.max_delay_ms {
            return Err(ConfigError::Invalid(
                "callback.min_delay_ms must be non-zero and not exceed max_delay_ms".into(),
            ));
        }
        if self.callback.factor < 1.0 {
            return Err(ConfigError::Invalid("callback.factor must be >= 1.0".into()));
        }
        if self.wire.max_decompressed_bytes == 0 {
            return Err(ConfigError::Invalid("wire.max_decompressed_bytes must be non-zero".into()));
        }
        Ok(())
    }

    /// A configuration with every default applied, for embedding and tests.
    pub fn with_defaults(node_id: NodeId, role: Role) -> Self {
        Self {
            node_id,
            role,
            store_path: default_store_path(),
            default_request_timeout_secs: default_request_timeout_secs(),
            auto_close_on_completed: default_auto_close(),
            callback: CallbackConfig::default(),
            ledger: LedgerClientConfig::default(),
            wire: WireConfig::default(),
            external_signer: None,
        }
    }
}

/// Backoff of the client callback retry queue.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CallbackConfig {
    /// First retry delay.
    #[serde(default = "default_cb_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Cap on the retry delay.
    #[serde(default = "default_cb_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between attempts.
    #[serde(default = "default_cb_factor")]
    pub factor: f32,
    /// Randomise delays.
    #[serde(default = "default_cb_jitter")]
    pub jitter: bool,
    /// Give up on a callback this long after it was queued.
    #[serde(default = "default_cb_total_timeout_ms")]
    pub total_timeout_ms: u64,
    /// Timeout of a single HTTP attempt.
    #[serde(default = "default_cb_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_cb_min_delay_ms() -> u64 {
    2_000
}
fn default_cb_max_delay_ms() -> u64 {
    120_000
}
fn default_cb_factor() -> f32 {
    2.0
}
fn default_cb_jitter() -> bool {
    true
}
fn default_cb_total_timeout_ms() -> u64 {
    3_600_000
}
fn default_cb_attempt_timeout_ms() -> u64 {
    30_000
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_cb_min_delay_ms(),
            max_delay_ms: default_cb_max_delay_ms(),
            factor: default_cb_factor(),
            jitter: default_cb_jitter(),
            total_timeout_ms: default_cb_total_timeout_ms(),
            attempt_timeout_ms: default_cb_attempt_timeout_ms(),
        }
    }
}

/// Retry and wait behaviour of the ledger client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerClientConfig {
    /// Attempts for a failing query before giving up.
    #[serde(default = "default_query_attempts")]
    pub query_retry_attempts: usize,
    /// First query retry delay.
    #[serde(default = "default_query_min_delay_ms")]
    pub query_min_delay_ms: u64,
    /// Cap on the query retry delay.
    #[serde(default = "default_query_max_delay_ms")]
    pub query_max_delay_ms: u64,
    /// How long a caller waiting for a commit blocks.
    #[serde(default = "default_commit_wait_timeout_ms")]
    pub commit_wait_timeout_ms: u64,
}

fn default_query_attempts() -> usize {
    5
}
fn default_query_min_delay_ms() -> u64 {
    200
}
fn default_query_max_delay_ms() -> u64 {
    5_000
}
fn default_commit_wait_timeout_ms() -> u64 {
    60_000
}

impl Default for LedgerClientConfig {
    fn default() -> Self {
        Self {
            query_retry_attempts: default_query_attempts(),
            query_min_delay_ms: default_query_min_delay_ms(),
            query_max_delay_ms: default_query_max_delay_ms(),
            commit_wait_timeout_ms: default_commit_wait_timeout_ms(),
        }
    }
}

/// Thresholds of the compact binary peer encoding.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WireConfig {
    /// Compress binary bodies larger than this many bytes.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    /// Move AS data larger than this many bytes into a raw segment.
    #[serde(default = "default_raw_segment_threshold")]
    pub raw_segment_threshold_bytes: usize,
    /// zstd compression level.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// Largest body a compressed frame may inflate to.
    #[serde(default = "default_max_decompressed")]
    pub max_decompressed_bytes: usize,
}

fn default_compression_threshold() -> usize {
    2 * 1024
}
fn default_raw_segment_threshold() -> usize {
    64 * 1024
}
fn default_compression_level() -> i32 {
    3
}
fn default_max_decompressed() -> usize {
    16 * 1024 * 1024
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            compression_threshold_bytes: default_compression_threshold(),
            raw_segment_threshold_bytes: default_raw_segment_threshold(),
            compression_level: default_compression_level(),
            max_decompressed_bytes: default_max_decompressed(),
        }
    }
}

/// An HTTP service that signs on the node's behalf.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExternalSignerConfig {
    /// Sign endpoint URL.
    pub url: String,
    /// Request timeout.
    #[serde(default = "default_signer_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_signer_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_file_gets_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "node_id = \"rp1\"\nrole = \"rp\"").unwrap();
        let cfg = NodeConfig::load(file.path()).unwrap();
        assert_eq!(cfg.node_id.as_str(), "rp1");
        assert_eq!(cfg.role, Role::Rp);
        assert!(cfg.auto_close_on_completed);
        assert_eq!(cfg.callback.min_delay_ms, 2_000);
        assert_eq!(cfg.wire.compression_threshold_bytes, 2048);
        assert_eq!(cfg.wire.max_decompressed_bytes, 16 * 1024 * 1024);
        assert!(cfg.external_signer.is_none());
    }

    #[test]
    fn nested_sections_override_defaults() {
        let cfg = NodeConfig::from_toml_str(
            r#"
            node_id = "idp1"
            role = "idp"
            auto_close_on_completed = false

            [callback]
            min_delay_ms = 10
            max_delay_ms = 100
            jitter = false

            [external_signer]
            url = "http://signer.local/sign"
            "#,
        )
        .unwrap();
        assert!(!cfg.auto_close_on_completed);
        assert_eq!(cfg.callback.max_delay_ms, 100);
        assert!(!cfg.callback.jitter);
        assert_eq!(cfg.callback.factor, 2.0);
        assert_eq!(cfg.external_signer.unwrap().timeout_ms, 10_000);
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let err = NodeConfig::from_toml_str(
            "node_id = \"as1\"\nrole = \"as\"\n[callback]\nmin_delay_ms = 500\nmax_delay_ms = 100\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_decompression_cap_is_rejected() {
        let err = NodeConfig::from_toml_str(
            "node_id = \"as1\"\nrole = \"as\"\n[wire]\nmax_decompressed_bytes = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
