//! Configuration for MailBlast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "MAILBLAST_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Identity provider configuration
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Bulk dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname used in generated Message-IDs when the sender domain is unusable
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a free connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for local blob storage
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Base URL under which stored blobs are publicly served
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Timeout for downloading remote attachments, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Largest attachment accepted, in bytes
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            public_base_url: default_public_base_url(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/mailblast/blobs")
}

fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_attachment_bytes() -> u64 {
    25 * 1024 * 1024 // 25 MB
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Base URL of the hosted auth service
    #[serde(default = "default_identity_url")]
    pub url: String,

    /// Project API key sent alongside user tokens
    pub api_key: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_identity_timeout")]
    pub timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: default_identity_url(),
            api_key: None,
            timeout_ms: default_identity_timeout(),
        }
    }
}

fn default_identity_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_identity_timeout() -> u64 {
    5000
}

/// Bulk dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Hard ceiling on jobs accepted by a single run
    #[serde(default = "default_max_jobs_per_run")]
    pub max_jobs_per_run: usize,

    /// Minimum interval between published progress snapshots
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Sliding window used for throughput measurement
    #[serde(default = "default_throughput_window")]
    pub throughput_window_ms: u64,

    /// SMTP connect and handshake timeout, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for one complete SMTP send, in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Number of outcomes buffered before history rows are written
    #[serde(default = "default_history_flush_size")]
    pub history_flush_size: usize,

    /// How often the schedule worker looks for due schedules, in seconds
    #[serde(default = "default_schedule_poll")]
    pub schedule_poll_secs: u64,

    /// Throughput bands (emails per second) used for the performance tier
    #[serde(default)]
    pub tiers: TierThresholds,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_jobs_per_run: default_max_jobs_per_run(),
            progress_interval_ms: default_progress_interval(),
            throughput_window_ms: default_throughput_window(),
            connect_timeout_secs: default_connect_timeout(),
            send_timeout_secs: default_send_timeout(),
            history_flush_size: default_history_flush_size(),
            schedule_poll_secs: default_schedule_poll(),
            tiers: TierThresholds::default(),
        }
    }
}

fn default_max_jobs_per_run() -> usize {
    10_000
}

fn default_progress_interval() -> u64 {
    500
}

fn default_throughput_window() -> u64 {
    5_000
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_send_timeout() -> u64 {
    60
}

fn default_history_flush_size() -> usize {
    50
}

fn default_schedule_poll() -> u64 {
    30
}

/// Lower bounds, in emails per second, of each performance tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    #[serde(default = "default_tier_moderate")]
    pub moderate: f64,
    #[serde(default = "default_tier_fast")]
    pub fast: f64,
    #[serde(default = "default_tier_excellent")]
    pub excellent: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            moderate: default_tier_moderate(),
            fast: default_tier_fast(),
            excellent: default_tier_excellent(),
        }
    }
}

fn default_tier_moderate() -> f64 {
    1.0
}

fn default_tier_fast() -> f64 {
    5.0
}

fn default_tier_excellent() -> f64 {
    20.0
}

impl Config {
    /// Load configuration from a file, with `MAILBLAST__SECTION__KEY` environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("MAILBLAST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the first file found in the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&explicit));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/mailblast/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.hostname, "localhost");
        assert_eq!(server.bind_address, "0.0.0.0");

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.max_jobs_per_run, 10_000);
        assert_eq!(dispatch.progress_interval_ms, 500);
        assert_eq!(dispatch.tiers.fast, 5.0);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "mail.example.com"

[database]
url = "postgres://localhost/mailblast"

[dispatch]
max_jobs_per_run = 500
send_timeout_secs = 20

[dispatch.tiers]
excellent = 50.0
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "mail.example.com");
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/mailblast")
        );
        assert_eq!(config.dispatch.max_jobs_per_run, 500);
        assert_eq!(config.dispatch.send_timeout_secs, 20);
        assert_eq!(config.dispatch.progress_interval_ms, 500);
        assert_eq!(config.dispatch.tiers.excellent, 50.0);
        assert_eq!(config.dispatch.tiers.moderate, 1.0);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"postgres://db/mailblast\"\n\n[api]\nport = 9090"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.database.max_connections, 20);
    }
}
