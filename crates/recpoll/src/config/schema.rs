use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerConfig {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database: DatabaseConfig::default(),
            drive: DriveConfig::default(),
            matcher: MatcherConfig::default(),
            processor: ProcessorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            lease: LeaseConfig::default(),
            selection: SelectionConfig::default(),
            polling: PollingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// SQLite file; `~/.recpoll/data/recpoll.db` when unset.
    #[serde(default)]
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => Some(PathBuf::from(crate::secrets::expand_home(path))),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    #[serde(default = "default_drive_base_url")]
    pub base_url: String,
    /// OAuth bearer token for the files API.
    #[serde(default)]
    pub token: SecretSource,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_drive_base_url() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            base_url: default_drive_base_url(),
            token: SecretSource::default(),
            request_timeout_secs: default_request_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherConfig {
    #[serde(default = "default_video_window")]
    pub video_window_minutes: i64,
    #[serde(default = "default_transcript_window")]
    pub transcript_window_minutes: i64,
    /// Filename marker written by the notes generator.
    #[serde(default = "default_transcript_marker")]
    pub transcript_marker: String,
    /// Restricts the transcript search to one folder.
    #[serde(default)]
    pub transcript_folder_id: Option<String>,
}

fn default_video_window() -> i64 {
    30
}

fn default_transcript_window() -> i64 {
    40
}

fn default_transcript_marker() -> String {
    "Notes by Gemini".to_string()
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            video_window_minutes: default_video_window(),
            transcript_window_minutes: default_transcript_window(),
            transcript_marker: default_transcript_marker(),
            transcript_folder_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorConfig {
    /// Endpoint receiving matched jobs as JSON.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub token: SecretSource,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// Processing failures before a job moves to `error`.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_max_failures() -> u32 {
    3
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            token: SecretSource::default(),
            timeout_secs: default_request_timeout_secs(),
            max_failures: default_max_failures(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_requests_per_minute() -> u32 {
    50
}

fn default_min_interval_ms() -> u64 {
    200
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests_per_minute: default_max_requests_per_minute(),
            min_interval_ms: default_min_interval_ms(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseConfig {
    #[serde(default = "default_lease_timeout_secs")]
    pub timeout_secs: u64,
    /// Lease holder name; a random instance id when unset.
    #[serde(default)]
    pub holder: Option<String>,
}

fn default_lease_timeout_secs() -> u64 {
    120
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lease_timeout_secs(),
            holder: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionConfig {
    #[serde(default = "default_recency_lookback_minutes")]
    pub recency_lookback_minutes: i64,
    /// Pending jobs older than this are cancelled.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_recency_lookback_minutes() -> i64 {
    120
}

fn default_max_age_hours() -> i64 {
    24
}

fn default_max_results() -> u32 {
    10
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            recency_lookback_minutes: default_recency_lookback_minutes(),
            max_age_hours: default_max_age_hours(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_concurrency() -> usize {
    3
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Plain,
        }
    }
}
