//! Sequencer configuration, loaded from a TOML file.
//!
//! Every field has a default so a partial file (or an empty one) yields a runnable local
//! setup.

use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use rollup_lock::LockConfig;
use rollup_primitives::RollupSize;
use rollup_proof_pipeline::{PipelineConfig, RetryConfig};
use rollup_publish_timer::BridgeConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TXS_PER_INNER: u32 = 4;
const DEFAULT_INNERS_PER_ROOT: u32 = 2;
const DEFAULT_ROLLUP_TIMEOUT_DURATION_SECS: u64 = 3600;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_COMMAND_BUFFER: usize = 256;
const DEFAULT_DAILY_TX_LIMIT: u64 = 1_000;
const DEFAULT_LOCK_NAME: &str = "rollup-sequencer";
const DEFAULT_LEASE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;
const DEFAULT_PING_INTERVAL_MS: u64 = 10_000;
const DEFAULT_ALERT_AFTER_MS: u64 = 300_000;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_MAX_IN_FLIGHT: usize = 16;
const DEFAULT_USE_ROOT_VERIFIER: bool = false;
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 8545;
const DEFAULT_LOG_FILE_PREFIX: &str = "rollup-sequencer";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rollup size must be non-zero (txs_per_inner {txs_per_inner}, inners_per_root {inners_per_root})")]
    ZeroRollupSize {
        txs_per_inner: u32,
        inners_per_root: u32,
    },

    #[error("lock ping interval {ping_ms}ms must be shorter than the lease timeout {lease_ms}ms")]
    PingNotBelowLease { ping_ms: u64, lease_ms: u64 },

    #[error("prover needs at least one worker")]
    NoWorkers,

    #[error("invalid rpc address {0}")]
    RpcAddress(String),
}

/// Rollup shape and batching cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupSection {
    #[serde(default = "default_values::txs_per_inner")]
    pub txs_per_inner: u32,

    #[serde(default = "default_values::inners_per_root")]
    pub inners_per_root: u32,

    /// How often the service loop re-evaluates the close decision.
    #[serde(default = "default_values::poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Depth of the command queue feeding the service loop.
    #[serde(default = "default_values::command_buffer")]
    pub command_buffer: usize,
}

/// Epoch-aligned forced publish schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSection {
    /// Values below 1 disable timeout-based publishing.
    #[serde(default = "default_values::rollup_timeout_duration_secs")]
    pub rollup_timeout_duration_secs: u64,

    #[serde(default)]
    pub bridges: Vec<BridgeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionSection {
    /// Transactions one identifier may submit per UTC day.
    #[serde(default = "default_values::daily_tx_limit")]
    pub daily_tx_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_values::lock_name")]
    pub name: String,

    /// Replica identity written into the lease. Defaults to a per-process value.
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default = "default_values::lease_timeout_ms")]
    pub lease_timeout_ms: u64,

    #[serde(default = "default_values::retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_values::ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_values::alert_after_ms")]
    pub alert_after_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProverSection {
    #[serde(default = "default_values::workers")]
    pub workers: usize,

    #[serde(default = "default_values::max_in_flight")]
    pub max_in_flight: usize,

    /// Compress each root proof with a recursive verifier proof before publishing.
    #[serde(default = "default_values::use_root_verifier")]
    pub use_root_verifier: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcSection {
    #[serde(default = "default_values::rpc_host")]
    pub host: String,

    #[serde(default = "default_values::rpc_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log to stdout as JSON instead of the compact format.
    #[serde(default)]
    pub json_format: bool,

    /// Directory for rolling log files; file logging is off when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_values::log_file_prefix")]
    pub log_file_prefix: String,

    /// Optional label appended to the service name, e.g. the replica name.
    #[serde(default)]
    pub service_label: Option<String>,

    /// Extra filter directives, e.g. `rollup_lock=debug`.
    #[serde(default)]
    pub directives: Vec<String>,
}

/// Complete sequencer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequencerConfig {
    #[serde(default)]
    pub rollup: RollupSection,

    #[serde(default)]
    pub publish: PublishSection,

    #[serde(default)]
    pub admission: AdmissionSection,

    #[serde(default)]
    pub lock: LockSection,

    #[serde(default)]
    pub prover: ProverSection,

    #[serde(default)]
    pub rpc: RpcSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

impl SequencerConfig {
    /// Reads and validates a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let RollupSection {
            txs_per_inner,
            inners_per_root,
            ..
        } = self.rollup;
        if txs_per_inner == 0 || inners_per_root == 0 {
            return Err(ConfigError::ZeroRollupSize {
                txs_per_inner,
                inners_per_root,
            });
        }

        if self.lock.ping_interval_ms >= self.lock.lease_timeout_ms {
            return Err(ConfigError::PingNotBelowLease {
                ping_ms: self.lock.ping_interval_ms,
                lease_ms: self.lock.lease_timeout_ms,
            });
        }

        if self.prover.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        self.rpc.socket_addr()?;
        Ok(())
    }

    pub fn rollup_size(&self) -> RollupSize {
        RollupSize::new(self.rollup.txs_per_inner, self.rollup.inners_per_root)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.rollup.poll_interval_ms)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_in_flight: self.prover.max_in_flight,
            retry: self.prover.retry.clone(),
        }
    }
}

impl LockSection {
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            lease_timeout: Duration::from_millis(self.lease_timeout_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            alert_after: Duration::from_millis(self.alert_after_ms),
        }
    }
}

impl RpcSection {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::RpcAddress(addr))
    }
}

impl Default for RollupSection {
    fn default() -> Self {
        Self {
            txs_per_inner: default_values::txs_per_inner(),
            inners_per_root: default_values::inners_per_root(),
            poll_interval_ms: default_values::poll_interval_ms(),
            command_buffer: default_values::command_buffer(),
        }
    }
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            rollup_timeout_duration_secs: default_values::rollup_timeout_duration_secs(),
            bridges: Vec::new(),
        }
    }
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            daily_tx_limit: default_values::daily_tx_limit(),
        }
    }
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            name: default_values::lock_name(),
            owner: None,
            lease_timeout_ms: default_values::lease_timeout_ms(),
            retry_interval_ms: default_values::retry_interval_ms(),
            ping_interval_ms: default_values::ping_interval_ms(),
            alert_after_ms: default_values::alert_after_ms(),
        }
    }
}

impl Default for ProverSection {
    fn default() -> Self {
        Self {
            workers: default_values::workers(),
            max_in_flight: default_values::max_in_flight(),
            use_root_verifier: default_values::use_root_verifier(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            host: default_values::rpc_host(),
            port: default_values::rpc_port(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            json_format: false,
            log_dir: None,
            log_file_prefix: default_values::log_file_prefix(),
            service_label: None,
            directives: Vec::new(),
        }
    }
}

mod default_values {
    use super::*;

    pub(super) const fn txs_per_inner() -> u32 {
        DEFAULT_TXS_PER_INNER
    }

    pub(super) const fn inners_per_root() -> u32 {
        DEFAULT_INNERS_PER_ROOT
    }

    pub(super) const fn poll_interval_ms() -> u64 {
        DEFAULT_POLL_INTERVAL_MS
    }

    pub(super) const fn command_buffer() -> usize {
        DEFAULT_COMMAND_BUFFER
    }

    pub(super) const fn rollup_timeout_duration_secs() -> u64 {
        DEFAULT_ROLLUP_TIMEOUT_DURATION_SECS
    }

    pub(super) const fn daily_tx_limit() -> u64 {
        DEFAULT_DAILY_TX_LIMIT
    }

    pub(super) fn lock_name() -> String {
        DEFAULT_LOCK_NAME.to_owned()
    }

    pub(super) const fn lease_timeout_ms() -> u64 {
        DEFAULT_LEASE_TIMEOUT_MS
    }

    pub(super) const fn retry_interval_ms() -> u64 {
        DEFAULT_RETRY_INTERVAL_MS
    }

    pub(super) const fn ping_interval_ms() -> u64 {
        DEFAULT_PING_INTERVAL_MS
    }

    pub(super) const fn alert_after_ms() -> u64 {
        DEFAULT_ALERT_AFTER_MS
    }

    pub(super) const fn workers() -> usize {
        DEFAULT_WORKERS
    }

    pub(super) const fn max_in_flight() -> usize {
        DEFAULT_MAX_IN_FLIGHT
    }

    pub(super) const fn use_root_verifier() -> bool {
        DEFAULT_USE_ROOT_VERIFIER
    }

    pub(super) fn rpc_host() -> String {
        DEFAULT_RPC_HOST.to_owned()
    }

    pub(super) const fn rpc_port() -> u16 {
        DEFAULT_RPC_PORT
    }

    pub(super) fn log_file_prefix() -> String {
        DEFAULT_LOG_FILE_PREFIX.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SequencerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SequencerConfig::default());
        assert_eq!(config.rollup_size(), RollupSize::new(4, 2));
        assert_eq!(config.publish.rollup_timeout_duration_secs, 3600);
        assert_eq!(config.admission.daily_tx_limit, 1000);
        assert_eq!(config.lock.lock_config(), LockConfig::default());
        assert_eq!(config.pipeline_config().max_in_flight, 16);
        assert_eq!(config.pipeline_config().retry, RetryConfig::default());
        assert!(!config.prover.use_root_verifier);
        assert_eq!(
            config.rpc.socket_addr().unwrap(),
            "127.0.0.1:8545".parse().unwrap()
        );
    }

    #[test]
    fn test_sample_config_roundtrip_serialization() {
        let sample = r#"
            [rollup]
            txs_per_inner = 8
            inners_per_root = 4
            poll_interval_ms = 250

            [publish]
            rollup_timeout_duration_secs = 600

            [[publish.bridges]]
            bridge_id = 1
            rollup_frequency = 2

            [[publish.bridges]]
            bridge_id = 7
            rollup_frequency = 0

            [admission]
            daily_tx_limit = 50

            [lock]
            name = "seq-main"
            owner = "replica-a"
            lease_timeout_ms = 20000
            ping_interval_ms = 5000

            [prover]
            workers = 2
            use_root_verifier = true

            [prover.retry]
            max_retries = 5
            base_delay_ms = 200
            multiplier = 1.5
            max_delay_ms = 10000

            [rpc]
            host = "0.0.0.0"
            port = 9000

            [logging]
            json_format = true
            log_dir = "/var/log/rollup"
            directives = ["rollup_lock=debug"]
        "#;

        let config = SequencerConfig::from_toml_str(sample).unwrap();
        assert_eq!(config.rollup.txs_per_inner, 8);
        assert_eq!(config.rollup.command_buffer, DEFAULT_COMMAND_BUFFER);
        assert_eq!(config.publish.bridges.len(), 2);
        assert_eq!(config.lock.owner.as_deref(), Some("replica-a"));
        assert_eq!(config.lock.retry_interval_ms, DEFAULT_RETRY_INTERVAL_MS);
        assert_eq!(config.prover.retry.max_retries, 5);
        assert_eq!(config.logging.log_file_prefix, DEFAULT_LOG_FILE_PREFIX);

        let serialized = toml::to_string(&config).unwrap();
        let reparsed = SequencerConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = SequencerConfig::from_toml_str("[rollup]\ntxs_per_inner = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroRollupSize { .. }));

        let err = SequencerConfig::from_toml_str("[lock]\nping_interval_ms = 30000\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::PingNotBelowLease {
                ping_ms: 30000,
                lease_ms: 30000
            }
        ));

        let err = SequencerConfig::from_toml_str("[prover]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoWorkers));

        let err = SequencerConfig::from_toml_str("[rpc]\nhost = \"not a host\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::RpcAddress(_)));

        let err = SequencerConfig::from_toml_str("[rollup\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[admission]\ndaily_tx_limit = 3").unwrap();
        let config = SequencerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.admission.daily_tx_limit, 3);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            SequencerConfig::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
