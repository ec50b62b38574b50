//! Configuration types for kaizoku-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Queue and dispatch behavior configuration
///
/// Groups the options the dispatcher recognizes. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueConfig {
    /// Global concurrency ceiling across all providers (default: 3)
    #[serde(default = "default_simultaneous_downloads")]
    pub simultaneous_downloads: usize,

    /// Per-provider concurrency ceiling (default: 1)
    #[serde(default = "default_downloads_per_provider")]
    pub downloads_per_provider: usize,

    /// Maximum retry attempts per item after the first failure (default: 3)
    #[serde(default = "default_chapter_fail_retries")]
    pub chapter_fail_retries: u32,

    /// Base backoff between item retries, as an `H:M:S` string
    /// (default: "0:05:00"). Malformed values parse as zero.
    #[serde(default = "default_chapter_fail_retry_time")]
    pub chapter_fail_retry_time: String,

    /// Worker lease; a Running claim older than this is reclaimable
    /// (default: 600 seconds)
    #[serde(default = "default_lease_duration", with = "duration_serde")]
    pub lease_duration: Duration,

    /// Lease sweeper interval; defaults to `lease_duration / 3` when unset
    #[serde(default, with = "optional_duration_serde")]
    pub sweep_interval: Option<Duration>,

    /// Dispatcher timer tick when no notification arrives (default: 5 seconds)
    #[serde(default = "default_dispatch_tick", with = "duration_serde")]
    pub dispatch_tick: Duration,

    /// Budget for draining active workers during graceful shutdown
    /// (default: 30 seconds)
    #[serde(default = "default_shutdown_budget", with = "duration_serde")]
    pub shutdown_budget: Duration,
}

impl QueueConfig {
    /// Base backoff duration, parsed from [`Self::chapter_fail_retry_time`]
    pub fn retry_base(&self) -> Duration {
        parse_hms(&self.chapter_fail_retry_time)
    }

    /// Effective sweeper interval
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval.unwrap_or(self.lease_duration / 3)
    }

    /// Heartbeat cadence for running workers
    pub fn heartbeat_interval(&self) -> Duration {
        self.lease_duration / 3
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            simultaneous_downloads: default_simultaneous_downloads(),
            downloads_per_provider: default_downloads_per_provider(),
            chapter_fail_retries: default_chapter_fail_retries(),
            chapter_fail_retry_time: default_chapter_fail_retry_time(),
            lease_duration: default_lease_duration(),
            sweep_interval: None,
            dispatch_tick: default_dispatch_tick(),
            shutdown_budget: default_shutdown_budget(),
        }
    }
}

/// Library storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageConfig {
    /// Root of the manga library (default: "./library")
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Default category folder inserted between root and series folders
    #[serde(default)]
    pub default_category: Option<String>,

    /// Path to the sqlite queue database (default: "./kaizoku.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            default_category: None,
            database_path: default_database_path(),
        }
    }
}

/// Extension bridge connection configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BridgeConfig {
    /// Base URL of the extension host (default: "http://127.0.0.1:4567")
    #[serde(default = "default_bridge_url")]
    pub base_url: String,

    /// Per-request timeout (default: 300 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum attempts when the host answers HTTP 429 (default: 3)
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            request_timeout: default_request_timeout(),
            rate_limit_attempts: default_rate_limit_attempts(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Bind address for the API server (default: 127.0.0.1:8833)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins; "*" or empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Retry configuration for page fetches within one chapter attempt
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

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

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Main configuration for the orchestrator
///
/// Fields are organized into logical sub-configs:
/// - [`queue`](QueueConfig) — dispatch ceilings, retries, leases
/// - [`storage`](StorageConfig) — library root, database path
/// - [`bridge`](BridgeConfig) — extension host connection
/// - [`api`](ApiConfig) — REST surface
/// - [`page_retry`](RetryConfig) — in-attempt page fetch retries
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Queue and dispatch behavior
    #[serde(default)]
    pub queue: QueueConfig,

    /// Library storage layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Extension bridge connection
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,

    /// Page fetch retry policy within one chapter attempt
    #[serde(default)]
    pub page_retry: RetryConfig,
}

/// Parse a duration given as `H:M:S`.
///
/// Malformed strings and out-of-range fields yield `Duration::ZERO`,
/// with a warning, so a bad setting degrades to "retry immediately"
/// rather than aborting startup.
pub fn parse_hms(value: &str) -> Duration {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        tracing::warn!(value, "malformed H:M:S duration, treating as zero");
        return Duration::ZERO;
    }

    let parsed: Option<(u64, u64, u64)> = (|| {
        let h = parts[0].parse().ok()?;
        let m: u64 = parts[1].parse().ok()?;
        let s: u64 = parts[2].parse().ok()?;
        if m >= 60 || s >= 60 {
            return None;
        }
        Some((h, m, s))
    })();

    match parsed {
        Some((h, m, s)) => Duration::from_secs(h * 3600 + m * 60 + s),
        None => {
            tracing::warn!(value, "malformed H:M:S duration, treating as zero");
            Duration::ZERO
        }
    }
}

fn default_simultaneous_downloads() -> usize {
    3
}

fn default_downloads_per_provider() -> usize {
    1
}

fn default_chapter_fail_retries() -> u32 {
    3
}

fn default_chapter_fail_retry_time() -> String {
    "0:05:00".to_string()
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(600)
}

fn default_dispatch_tick() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_budget() -> Duration {
    Duration::from_secs(30)
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./library")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./kaizoku.db")
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:4567".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_rate_limit_attempts() -> u32 {
    3
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8833))
}

fn default_max_attempts() -> u32 {
    3
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

fn default_true() -> bool {
    true
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

// Optional Duration serialization helper
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

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hms_accepts_well_formed_values() {
        assert_eq!(parse_hms("0:00:01"), Duration::from_secs(1));
        assert_eq!(parse_hms("0:05:00"), Duration::from_secs(300));
        assert_eq!(parse_hms("1:30:15"), Duration::from_secs(5415));
        assert_eq!(parse_hms("48:00:00"), Duration::from_secs(48 * 3600));
    }

    #[test]
    fn parse_hms_tolerates_surrounding_whitespace() {
        assert_eq!(parse_hms(" 0:01:00 "), Duration::from_secs(60));
    }

    #[test]
    fn parse_hms_malformed_values_are_zero() {
        assert_eq!(parse_hms(""), Duration::ZERO);
        assert_eq!(parse_hms("banana"), Duration::ZERO);
        assert_eq!(parse_hms("10"), Duration::ZERO);
        assert_eq!(parse_hms("1:2"), Duration::ZERO);
        assert_eq!(parse_hms("1:2:3:4"), Duration::ZERO);
        assert_eq!(parse_hms("-1:00:00"), Duration::ZERO);
    }

    #[test]
    fn parse_hms_out_of_range_fields_are_zero() {
        assert_eq!(parse_hms("0:61:00"), Duration::ZERO);
        assert_eq!(parse_hms("0:00:75"), Duration::ZERO);
    }

    #[test]
    fn retry_base_reads_from_config_string() {
        let queue = QueueConfig {
            chapter_fail_retry_time: "0:00:02".into(),
            ..QueueConfig::default()
        };
        assert_eq!(queue.retry_base(), Duration::from_secs(2));
    }

    #[test]
    fn sweep_interval_defaults_to_a_third_of_the_lease() {
        let queue = QueueConfig {
            lease_duration: Duration::from_secs(600),
            sweep_interval: None,
            ..QueueConfig::default()
        };
        assert_eq!(queue.sweep_interval(), Duration::from_secs(200));

        let explicit = QueueConfig {
            sweep_interval: Some(Duration::from_secs(5)),
            ..QueueConfig::default()
        };
        assert_eq!(explicit.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn config_deserializes_from_empty_json_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.queue.simultaneous_downloads, 3);
        assert_eq!(config.queue.downloads_per_provider, 1);
        assert_eq!(config.queue.chapter_fail_retries, 3);
        assert_eq!(config.queue.lease_duration, Duration::from_secs(600));
        assert_eq!(config.bridge.base_url, "http://127.0.0.1:4567");
        assert_eq!(config.bridge.request_timeout, Duration::from_secs(300));
        assert_eq!(config.storage.storage_root, PathBuf::from("./library"));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = Config {
            queue: QueueConfig {
                simultaneous_downloads: 8,
                lease_duration: Duration::from_secs(120),
                sweep_interval: Some(Duration::from_secs(10)),
                ..QueueConfig::default()
            },
            ..Config::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.queue.simultaneous_downloads, 8);
        assert_eq!(back.queue.lease_duration, Duration::from_secs(120));
        assert_eq!(back.queue.sweep_interval, Some(Duration::from_secs(10)));
    }
}
