use chrono::Duration;
use serde::Deserialize;

use crate::cache::refresh::RefreshPolicy;
use crate::helpers::time::seconds;
use crate::resilience::retry::RetrySettings;

pub const MAX_ENTRIES_DEFAULT: usize = 1024;
pub const MIN_TOKEN_LIFETIME_SECONDS_DEFAULT: u64 = 2 * 60;
pub const REFRESH_JITTER_SECONDS_DEFAULT: u64 = 3 * 60;
pub const CERTIFICATES_TTL_SECONDS_DEFAULT: u64 = 60 * 60;
/// upper bound for the token floor and the refresh jitter window
pub const REFRESH_SECONDS_MAX: u64 = 24 * 60 * 60;

pub const METADATA_TOKEN_URL_DEFAULT: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
pub const CERTIFICATES_URL_DEFAULT: &str = "https://www.googleapis.com/robot/v1/metadata/x509";
pub const IAM_URL_DEFAULT: &str = "https://iam.googleapis.com/v1";

/// ================================
/// Cache settings
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    /// service account used for certificates and blob signing
    pub service_account: String,
    /// LRU capacity of the token cache
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// cached tokens are never served within this margin of their real expiry
    #[serde(default = "default_min_token_lifetime_seconds")]
    pub min_token_lifetime_seconds: u64,
    /// window before expiry in which callers refresh at random
    #[serde(default = "default_refresh_jitter_seconds")]
    pub refresh_jitter_seconds: u64,
    #[serde(default = "default_certificates_ttl_seconds")]
    pub certificates_ttl_seconds: u64,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    pub logging: Option<LoggingConfig>,
    pub retry: Option<RetryConfig>,
}

impl CacheSettings {
    pub fn new(service_account: impl Into<String>) -> Self {
        Self {
            service_account: service_account.into(),
            max_entries: MAX_ENTRIES_DEFAULT,
            min_token_lifetime_seconds: MIN_TOKEN_LIFETIME_SECONDS_DEFAULT,
            refresh_jitter_seconds: REFRESH_JITTER_SECONDS_DEFAULT,
            certificates_ttl_seconds: CERTIFICATES_TTL_SECONDS_DEFAULT,
            endpoints: EndpointsConfig::default(),
            logging: None,
            retry: None,
        }
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new(
            seconds(self.min_token_lifetime_seconds),
            seconds(self.refresh_jitter_seconds),
        )
    }

    pub fn certificates_ttl(&self) -> Duration {
        seconds(self.certificates_ttl_seconds)
    }

    /// Back-off for callers retrying transient failures on top of the caches.
    pub fn retry_settings(&self) -> RetrySettings {
        self.retry.as_ref().map(RetrySettings::from).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    #[serde(default = "default_metadata_token_url")]
    pub metadata_token_url: String,
    #[serde(default = "default_certificates_url")]
    pub certificates_url: String,
    #[serde(default = "default_iam_url")]
    pub iam_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            metadata_token_url: default_metadata_token_url(),
            certificates_url: default_certificates_url(),
            iam_url: default_iam_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub attempts: Option<u32>,
    /// will be mutiply by 2 on every attempt until max_delay_ms
    pub base_delay_ms: Option<u64>,
    /// invariant: >= base_delay_ms
    pub max_delay_ms: Option<u64>,
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // allowed: trace, debug, info, warn, error
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new(level: String, format: LogFormat) -> Self {
        Self { level, format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("info".to_owned(), LogFormat::Compact)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "json".to_string())
            .to_lowercase()
            .as_str()
        {
            "compact" | "text" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

fn default_max_entries() -> usize {
    MAX_ENTRIES_DEFAULT
}

fn default_min_token_lifetime_seconds() -> u64 {
    MIN_TOKEN_LIFETIME_SECONDS_DEFAULT
}

fn default_refresh_jitter_seconds() -> u64 {
    REFRESH_JITTER_SECONDS_DEFAULT
}

fn default_certificates_ttl_seconds() -> u64 {
    CERTIFICATES_TTL_SECONDS_DEFAULT
}

fn default_metadata_token_url() -> String {
    METADATA_TOKEN_URL_DEFAULT.to_owned()
}

fn default_certificates_url() -> String {
    CERTIFICATES_URL_DEFAULT.to_owned()
}

fn default_iam_url() -> String {
    IAM_URL_DEFAULT.to_owned()
}
