use tokio::time::{sleep, Duration};
use anyhow::Result;
use tracing::{error, warn};

use crate::config::settings::RetryConfig;
use crate::resilience::transient::is_transient;

/// Exponential back-off for callers sitting above the caches.
///
/// Only errors tagged transient are retried; permanent ones are returned on
/// the first attempt.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { attempts: 3, base_delay_ms: 200, max_delay_ms: 1000 }
    }
}

impl From<&RetryConfig> for RetrySettings {
    fn from(cfg: &RetryConfig) -> Self {
        let defaults = Self::default();
        Self {
            attempts: cfg.attempts.unwrap_or(defaults.attempts).max(1),
            base_delay_ms: cfg.base_delay_ms.unwrap_or(defaults.base_delay_ms),
            max_delay_ms: cfg.max_delay_ms.unwrap_or(defaults.max_delay_ms),
        }
    }
}

impl RetrySettings {
    /// Doubles `delay`, capped at `max_delay_ms`.
    fn next_delay(&self, delay: u64) -> u64 {
        delay.saturating_mul(2).min(self.max_delay_ms)
    }

    pub async fn run_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay_ms;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_transient(&e) => {
                    warn!("Attempt {attempt}/{attempts} failed: {e:#}");
                    sleep(Duration::from_millis(delay)).await;
                    delay = self.next_delay(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!("giving up after {attempt} attempt(s): {e:#}");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resilience::transient::transient;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetrySettings {
        RetrySettings { attempts: 4, base_delay_ms: 1, max_delay_ms: 2 }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let value = fast()
            .run_with_retry(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient(anyhow!("received HTTP 503")))
                } else {
                    Ok("certs")
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "certs");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = fast()
            .run_with_retry(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow!("could not decode HTTP response body"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("decode"));
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = &AtomicU32::new(0);
        let result = fast()
            .run_with_retry(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient(anyhow!("connection reset")))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn delay_doubles_up_to_the_cap_without_overflow() {
        let settings = RetrySettings { attempts: 3, base_delay_ms: 100, max_delay_ms: 300 };
        assert_eq!(settings.next_delay(100), 200);
        assert_eq!(settings.next_delay(200), 300);

        let huge = RetrySettings { attempts: 3, base_delay_ms: u64::MAX / 2 + 1, max_delay_ms: u64::MAX };
        assert_eq!(huge.next_delay(huge.base_delay_ms), u64::MAX);
    }

    #[test]
    fn settings_without_retry_section_use_defaults() {
        let settings = crate::config::settings::CacheSettings::new("robot");
        assert_eq!(settings.retry_settings().attempts, 3);
    }

    #[test]
    fn settings_from_config_fill_defaults() {
        let cfg = RetryConfig { attempts: Some(0), base_delay_ms: None, max_delay_ms: Some(50) };
        let settings = RetrySettings::from(&cfg);
        assert_eq!(settings.attempts, 1);
        assert_eq!(settings.base_delay_ms, 200);
        assert_eq!(settings.max_delay_ms, 50);
    }
}
