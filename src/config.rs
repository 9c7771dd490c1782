//! Configuration for plate-verifier.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Which registry client backs the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// JSON-RPC client against the deployed registry contract.
    #[default]
    Evm,
    /// In-memory registry loaded from a fixtures file.
    Static,
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP/WebSocket server listens on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Detection ingestion.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Verification cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Registry verifier retry policy.
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Notification hub.
    #[serde(default)]
    pub hub: HubConfig,

    /// Client sessions.
    #[serde(default)]
    pub session: SessionConfig,

    /// Registry client.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Detector collaborator.
    #[serde(default)]
    pub detector: DetectorConfig,
}

/// Detection ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// How long a source request id is remembered for deduplication.
    #[serde(default = "default_dedup_window", with = "humantime_serde")]
    pub dedup_window: Duration,

    /// Maximum number of request ids remembered at once.
    #[serde(default = "default_max_events_per_window")]
    pub max_events_per_window: usize,
}

/// Verification cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness period of a cached record.
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Extra period after `ttl` during which a record is served stale while
    /// a refresh runs.
    #[serde(default = "default_stale_grace", with = "humantime_serde")]
    pub stale_grace: Duration,

    /// Maximum number of cached plates (least recently used evicted first).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Registry verifier retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout applied to each registry call.
    #[serde(default = "default_per_attempt_timeout", with = "humantime_serde")]
    pub per_attempt_timeout: Duration,

    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Growth factor between consecutive retry delays.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Upper bound for a single retry delay.
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

/// Notification hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Capacity of each session's outbound queue.
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,

    /// Maximum live subscriptions per session.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_session: usize,
}

/// Client session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between server pings.
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// A session without a pong for this long is closed.
    #[serde(default = "default_heartbeat_timeout", with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    /// Maximum time spent flushing queued results while closing.
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Consecutive malformed messages tolerated before closing.
    #[serde(default = "default_max_protocol_errors")]
    pub max_protocol_errors: u32,
}

/// Registry client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Client implementation.
    #[serde(default)]
    pub kind: RegistryKind,

    /// JSON-RPC endpoint of the ledger node.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Deployment descriptor (`{address, abi}`) written by the deploy tooling.
    #[serde(default = "default_deployment_path")]
    pub deployment_path: PathBuf,

    /// Contract view function resolving a plate.
    #[serde(default = "default_lookup_method")]
    pub lookup_method: String,

    /// Fixtures file for the static registry.
    #[serde(default)]
    pub static_records: Option<PathBuf>,
}

/// Detector collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detection endpoint accepting a multipart image upload.
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout.
    #[serde(default = "default_detector_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
            ingest: IngestConfig::default(),
            cache: CacheConfig::default(),
            verifier: VerifierConfig::default(),
            hub: HubConfig::default(),
            session: SessionConfig::default(),
            registry: RegistryConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_window: default_dedup_window(),
            max_events_per_window: default_max_events_per_window(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            stale_grace: default_stale_grace(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            per_attempt_timeout: default_per_attempt_timeout(),
            initial_backoff: default_initial_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl VerifierConfig {
    /// Delay before the given attempt (0-based); the first attempt is immediate.
    #[must_use]
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self
            .backoff_multiplier
            .checked_pow(attempt - 1)
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Hard upper bound on the wall time of one verification.
    #[must_use]
    pub fn overall_deadline(&self) -> Duration {
        self.per_attempt_timeout
            .saturating_mul(self.max_retries.saturating_add(1))
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_size: default_outbound_queue_size(),
            max_subscriptions_per_session: default_max_subscriptions(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            drain_timeout: default_drain_timeout(),
            max_protocol_errors: default_max_protocol_errors(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_detector_timeout(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::default(),
            rpc_url: default_rpc_url(),
            deployment_path: default_deployment_path(),
            lookup_method: default_lookup_method(),
            static_records: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8765))
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_dedup_window() -> Duration {
    Duration::from_secs(60)
}

const fn default_max_events_per_window() -> usize {
    10_000
}

const fn default_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

const fn default_stale_grace() -> Duration {
    Duration::from_secs(15)
}

const fn default_max_entries() -> usize {
    10_000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_per_attempt_timeout() -> Duration {
    Duration::from_secs(2)
}

const fn default_initial_backoff() -> Duration {
    Duration::from_millis(250)
}

const fn default_backoff_multiplier() -> u32 {
    4
}

const fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

const fn default_outbound_queue_size() -> usize {
    256
}

const fn default_max_subscriptions() -> usize {
    32
}

const fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(15)
}

const fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_max_protocol_errors() -> u32 {
    5
}

fn default_rpc_url() -> String {
    // Local ganache node.
    "http://127.0.0.1:7545".to_string()
}

fn default_deployment_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "plate-verifier")
        .map(|dirs| dirs.config_dir().join("deployment-info.json"))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("deployment-info.json"))
}

fn default_lookup_method() -> String {
    "getVehicle".to_string()
}

const fn default_detector_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
