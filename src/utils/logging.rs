use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use crate::config::settings::{CacheSettings, LogFormat, LoggingConfig};

/// Initialize logging from settings; `level_override` (e.g. from `RUST_LOG`)
/// wins over the configured level.
pub fn run(settings: &CacheSettings, level_override: Option<&str>) {
    let configured = settings
        .logging
        .clone()
        .unwrap_or_else(|| LoggingConfig::new("info".to_owned(), LogFormat::from_env()));
    let logging_config = LoggingConfig::new(
        level_override
            .map(str::to_owned)
            .unwrap_or(configured.level),
        configured.format,
    );

    init_logging(&logging_config);
}

/// Initialize tracing with the desired config.
///
/// Does nothing when a global subscriber is already installed.
pub fn init_logging(cfg: &LoggingConfig) {
    let env_filter = EnvFilter::try_new(&cfg.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Base layer: filter + writer
    let registry = tracing_subscriber::registry().with(env_filter);

    // Choose format layer
    match cfg.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .flatten_event(true) // flattens fields, good for CRI log parsers
                .with_ansi(false); // CRI parsers dislike ANSI color codes

            let _ = registry.with(layer).try_init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(true);

            let _ = registry.with(layer).try_init();
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        let settings = CacheSettings::new("robot@example.iam.gserviceaccount.com");
        run(&settings, Some("debug"));
        init_logging(&LoggingConfig::new("not a filter[".to_owned(), LogFormat::Json));
        tracing::info!("logging initialized twice");
    }
}
