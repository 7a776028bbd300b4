//! Configuration types for extractor-agent

use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};

/// Main configuration for [`ExtractorAgent`](crate::ExtractorAgent)
///
/// Fields are organized into logical sub-configs:
/// - [`agent`](AgentConfig) — executor identity, batching, retry ceiling
/// - [`coordinator`](CoordinatorConfig) — registration and heartbeat RPC
/// - [`ingestion`](IngestionConfig) — content download and result upload
/// - [`extraction`](ExtractionConfig) — invoker pool and extractor modules
/// - [`tls`](TlsConfig) — optional client certificate material
/// - [`api`](ApiConfig) — debug HTTP surface
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Executor identity and scheduling knobs
    #[serde(default)]
    pub agent: AgentConfig,

    /// Coordinator connection settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Ingestion endpoint settings
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Extraction invoker settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// TLS material (None = plaintext)
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Debug HTTP surface settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check settings that would make the agent unusable
    ///
    /// Called once at startup; any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.agent.batch_size == 0 {
            return Err(Error::Config {
                message: "batch_size must be at least 1".to_string(),
                key: Some("agent.batch_size".to_string()),
            });
        }

        if self.ingestion.frame_size == 0 {
            return Err(Error::Config {
                message: "frame_size must be at least 1 byte".to_string(),
                key: Some("ingestion.frame_size".to_string()),
            });
        }

        if self.coordinator.heartbeat_interval.is_zero() {
            return Err(Error::Config {
                message: "heartbeat_interval must be greater than zero".to_string(),
                key: Some("coordinator.heartbeat_interval".to_string()),
            });
        }

        if self.extraction.pool_size == 0 {
            return Err(Error::Config {
                message: "pool_size must be at least 1".to_string(),
                key: Some("extraction.pool_size".to_string()),
            });
        }

        let multiplier = self.ingestion.report_retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config {
                message: format!("backoff_multiplier must be a finite number >= 1.0, got {multiplier}"),
                key: Some("ingestion.report_retry.backoff_multiplier".to_string()),
            });
        }

        if let Some(tls) = &self.tls {
            for (key, path) in [
                ("tls.cert_file", &tls.cert_file),
                ("tls.key_file", &tls.key_file),
                ("tls.ca_bundle", &tls.ca_bundle),
            ] {
                check_readable(key, path)?;
            }
        }

        for module in &self.extraction.modules {
            if module.name.is_empty() {
                return Err(Error::Config {
                    message: format!("extractor module {} has no name", module.command.display()),
                    key: Some("extraction.modules".to_string()),
                });
            }
        }

        Ok(())
    }

    /// `https` when TLS is configured, `http` otherwise
    pub fn http_scheme(&self) -> &'static str {
        if self.tls.is_some() { "https" } else { "http" }
    }

    /// `wss` when TLS is configured, `ws` otherwise
    pub fn ws_scheme(&self) -> &'static str {
        if self.tls.is_some() { "wss" } else { "ws" }
    }

    /// Socket address the debug HTTP surface binds to
    pub fn api_bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.api.bind_ip, self.agent.listen_port)
    }
}

fn check_readable(key: &str, path: &Path) -> Result<()> {
    std::fs::metadata(path)
        .map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: Some(key.to_string()),
        })
        .and_then(|meta| {
            if meta.is_file() {
                Ok(())
            } else {
                Err(Error::Config {
                    message: format!("{} is not a file", path.display()),
                    key: Some(key.to_string()),
                })
            }
        })
}

/// Executor identity and scheduling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Executor id (random UUID if None)
    #[serde(default)]
    pub executor_id: Option<String>,

    /// Maximum tasks per extraction batch (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Worker crashes tolerated per task before it fails permanently (default: 3)
    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,

    /// Port of the debug HTTP surface (default: 0 = ephemeral)
    #[serde(default)]
    pub listen_port: u16,

    /// Address advertised to the coordinator (auto-detected if None)
    #[serde(default)]
    pub advertise_addr: Option<String>,
}

impl AgentConfig {
    /// Soft admission ceiling reported in heartbeats
    pub fn max_pending_tasks(&self) -> usize {
        self.batch_size * 2
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executor_id: None,
            batch_size: default_batch_size(),
            max_task_retries: default_max_task_retries(),
            listen_port: 0,
            advertise_addr: None,
        }
    }
}

/// Coordinator RPC configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordinator `host:port` (default: localhost:8950)
    #[serde(default = "default_coordinator_addr")]
    pub addr: String,

    /// Interval between heartbeat messages (default: 5 seconds)
    #[serde(default = "default_heartbeat_interval", with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Fixed delay between registration attempts (default: 5 seconds)
    #[serde(default = "default_register_backoff", with = "duration_serde")]
    pub register_backoff: Duration,

    /// Maximum decoded/encoded gRPC message size (default: 16 MiB)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Bearer token sent as `authorization` metadata on every call
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            addr: default_coordinator_addr(),
            heartbeat_interval: default_heartbeat_interval(),
            register_backoff: default_register_backoff(),
            max_message_size: default_max_message_size(),
            auth_token: None,
        }
    }
}

/// How task payloads are downloaded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadMethod {
    /// Fetch the task's storage URL directly
    #[default]
    Direct,
    /// Fetch through the ingestion server's download endpoint
    ServerProxy,
}

/// Ingestion endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Ingestion `host:port` (default: localhost:8900)
    #[serde(default = "default_ingestion_addr")]
    pub addr: String,

    /// Download mode (default: direct)
    #[serde(default)]
    pub download_method: DownloadMethod,

    /// Multipart frame size in bytes (default: 1 MiB)
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// Timeout for a single content download (default: 300 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Backoff applied after a transient report failure
    #[serde(default)]
    pub report_retry: RetryConfig,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            addr: default_ingestion_addr(),
            download_method: DownloadMethod::default(),
            frame_size: default_frame_size(),
            download_timeout: default_download_timeout(),
            report_retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    /// Constant delay, no jitter
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Extraction invoker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Maximum concurrent extractor invocations (default: 4)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-batch invocation timeout (None = wait forever)
    ///
    /// A timed out batch is treated like a crashed worker and its tasks go
    /// through the retry path.
    #[serde(default, with = "optional_duration_serde")]
    pub extraction_timeout: Option<Duration>,

    /// Extractors run as external processes
    #[serde(default)]
    pub modules: Vec<ExtractorModuleConfig>,

    /// Whether to search PATH for module commands given as bare names (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            extraction_timeout: None,
            modules: Vec::new(),
            search_path: true,
        }
    }
}

/// An extractor implemented by an external executable
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractorModuleConfig {
    /// Extractor name used in tasks
    pub name: String,

    /// Executable path or bare command name
    pub command: PathBuf,

    /// Extra arguments passed before the request is written to stdin
    #[serde(default)]
    pub args: Vec<String>,

    /// Human readable description advertised to the coordinator
    #[serde(default)]
    pub description: String,

    /// Accepted input mime types advertised to the coordinator
    #[serde(default)]
    pub input_mime_types: Vec<String>,

    /// Input params schema advertised to the coordinator
    #[serde(default)]
    pub input_params: serde_json::Value,
}

/// Client TLS material, shared by the coordinator and ingestion channels
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM client certificate
    pub cert_file: PathBuf,

    /// PEM private key for `cert_file`
    pub key_file: PathBuf,

    /// PEM CA bundle used to verify servers
    pub ca_bundle: PathBuf,
}

/// Debug HTTP surface configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Interface to bind to (default: 0.0.0.0); the port is `agent.listen_port`
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_max_task_retries() -> u32 {
    3
}

fn default_coordinator_addr() -> String {
    "localhost:8950".to_string()
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_register_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}

fn default_ingestion_addr() -> String {
    "localhost:8900".to_string()
}

fn default_frame_size() -> usize {
    1024 * 1024
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_pool_size() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_documented_defaults() {
        let config: Config = serde_json::from_str("{}").expect("empty config must parse");

        assert_eq!(config.agent.batch_size, 10);
        assert_eq!(config.agent.max_task_retries, 3);
        assert_eq!(config.agent.max_pending_tasks(), 20);
        assert_eq!(config.coordinator.addr, "localhost:8950");
        assert_eq!(config.coordinator.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.coordinator.register_backoff, Duration::from_secs(5));
        assert_eq!(config.coordinator.max_message_size, 16 * 1024 * 1024);
        assert_eq!(config.ingestion.frame_size, 1_048_576);
        assert_eq!(config.ingestion.download_method, DownloadMethod::Direct);
        assert!(config.extraction.extraction_timeout.is_none());
        assert!(config.tls.is_none());
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn download_method_uses_kebab_case() {
        let config: Config =
            serde_json::from_str(r#"{"ingestion": {"download_method": "server-proxy"}}"#).unwrap();
        assert_eq!(config.ingestion.download_method, DownloadMethod::ServerProxy);
    }

    #[test]
    fn durations_are_integer_seconds() {
        let config: Config = serde_json::from_str(
            r#"{"coordinator": {"heartbeat_interval": 2}, "extraction": {"extraction_timeout": 90}}"#,
        )
        .unwrap();
        assert_eq!(config.coordinator.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(
            config.extraction.extraction_timeout,
            Some(Duration::from_secs(90))
        );

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["coordinator"]["heartbeat_interval"], 2);
        assert_eq!(json["extraction"]["extraction_timeout"], 90);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = Config::default();
        config.agent.batch_size = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("agent.batch_size")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn zero_frame_size_is_rejected() {
        let mut config = Config::default();
        config.ingestion.frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let mut config = Config::default();
        config.coordinator.heartbeat_interval = Duration::ZERO;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("coordinator.heartbeat_interval"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn missing_tls_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.pem");
        std::fs::write(&cert, "cert").unwrap();

        let mut config = Config::default();
        config.tls = Some(TlsConfig {
            cert_file: cert.clone(),
            key_file: dir.path().join("missing.key"),
            ca_bundle: cert,
        });

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("tls.key_file")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn schemes_follow_tls() {
        let dir = tempfile::tempdir().unwrap();
        let pem = dir.path().join("x.pem");
        std::fs::write(&pem, "x").unwrap();

        let mut config = Config::default();
        assert_eq!(config.http_scheme(), "http");
        assert_eq!(config.ws_scheme(), "ws");

        config.tls = Some(TlsConfig {
            cert_file: pem.clone(),
            key_file: pem.clone(),
            ca_bundle: pem,
        });
        assert_eq!(config.http_scheme(), "https");
        assert_eq!(config.ws_scheme(), "wss");
        config.validate().unwrap();
    }

    #[test]
    fn fixed_retry_has_no_growth() {
        let retry = RetryConfig::fixed(Duration::from_secs(5));
        assert_eq!(retry.initial_delay, retry.max_delay);
        assert_eq!(retry.backoff_multiplier, 1.0);
        assert!(!retry.jitter);
    }

    #[test]
    fn report_retry_multiplier_below_one_is_rejected() {
        for multiplier in [0.5, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.ingestion.report_retry.backoff_multiplier = multiplier;
            match config.validate() {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some("ingestion.report_retry.backoff_multiplier"));
                }
                other => panic!("multiplier {multiplier} accepted: {other:?}"),
            }
        }

        let mut config = Config::default();
        config.ingestion.report_retry.backoff_multiplier = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn api_binds_listen_port() {
        let mut config = Config::default();
        config.agent.listen_port = 9123;
        assert_eq!(config.api_bind_address().port(), 9123);
    }
}
