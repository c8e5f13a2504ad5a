//! Logging initialization for logrelay-daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `RelayConfig`. `RUST_LOG` wins over `general.log_level` when set.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use logrelay_core::config::GeneralConfig;

/// Build the event filter: `RUST_LOG` if present and valid, else the configured level.
pub fn env_filter(config: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Initialize the global tracing subscriber.
///
/// Must be called once, before the orchestrator is built.
///
/// * `"json"` - one JSON object per line (production default)
/// * `"pretty"` - multi-line human-readable output
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let result = match config.log_format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        other => {
            return Err(anyhow::anyhow!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            ));
        }
    };

    result.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn configured_level_used_without_rust_log() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::remove_var("RUST_LOG") };
        let config = GeneralConfig {
            log_level: "warn".to_owned(),
            ..GeneralConfig::default()
        };
        assert_eq!(env_filter(&config).to_string(), "warn");
    }

    #[test]
    #[serial]
    fn rust_log_takes_precedence() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe { std::env::set_var("RUST_LOG", "logrelay_pipeline=trace") };
        let filter = env_filter(&GeneralConfig::default());
        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(filter.to_string(), "logrelay_pipeline=trace");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let config = GeneralConfig {
            log_format: "xml".to_owned(),
            ..GeneralConfig::default()
        };
        let err = init_tracing(&config).unwrap_err();
        assert!(err.to_string().contains("unknown log format 'xml'"));
    }
}
