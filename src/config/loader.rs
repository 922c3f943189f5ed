use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use tracing::{debug, error};

use crate::config::settings::{CacheSettings, LoggingConfig, REFRESH_SECONDS_MAX};

/// Load, expand and validate settings from a YAML file
pub fn file_to_settings(path: &Path) -> Result<CacheSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("could not read config file {}", path.display()))?;
    let expanded = expand_env_vars(&content)?;
    parse_settings(&expanded)
}

pub fn parse_settings(content: &str) -> Result<CacheSettings> {
    let mut settings: CacheSettings = serde_yaml::from_str(content)
        .inspect_err(|e| error!("parse config error: {}", e))
        .map_err(|e| anyhow!("Invalid config format: {}", e))?;

    if settings.logging.is_none() {
        settings.logging = Some(LoggingConfig::default());
    }
    debug!("validation config ...");
    validate_settings(&settings)?;

    Ok(settings)
}

/// Configuration errors are reported before any cache is built.
pub fn validate_settings(settings: &CacheSettings) -> Result<()> {
    if settings.service_account.trim().is_empty() {
        bail!("service_account must not be empty");
    }
    if settings.max_entries == 0 {
        bail!("max_entries must be greater than zero");
    }
    if settings.certificates_ttl_seconds == 0 {
        bail!("certificates_ttl_seconds must be greater than zero");
    }
    if settings.min_token_lifetime_seconds > REFRESH_SECONDS_MAX {
        bail!(
            "min_token_lifetime_seconds ({}) must be <= {REFRESH_SECONDS_MAX}",
            settings.min_token_lifetime_seconds
        );
    }
    if settings.refresh_jitter_seconds > REFRESH_SECONDS_MAX {
        bail!(
            "refresh_jitter_seconds ({}) must be <= {REFRESH_SECONDS_MAX}",
            settings.refresh_jitter_seconds
        );
    }
    if let Some(retry) = &settings.retry {
        if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
            if max < base {
                bail!("retry.max_delay_ms ({max}) must be >= retry.base_delay_ms ({base})");
            }
        }
    }
    Ok(())
}

/// Replaces `${VAR}` and `${VAR:default}` with the environment value.
fn expand_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{(\w+)(?::([^\}]+))?\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}
