//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`
///
/// Returns `Ok(false)` if a subscriber was already installed, which is
/// harmless when several tests initialise logging.
///
/// # Errors
///
/// Returns an error if the configured level cannot be parsed.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let level: tracing::Level = config
        .level
        .to_lowercase()
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init().is_ok(),
        "pretty" => builder.pretty().try_init().is_ok(),
        _ => builder.compact().try_init().is_ok(),
    };

    Ok(installed)
}

/// Subscriber for tests: debug level, output captured by the test harness
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_bad_level() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            format: "compact".to_string(),
        };
        assert!(init(&config).is_err());
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_for_tests();
        init_for_tests();

        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
        };
        // A subscriber is already installed
        assert!(!init(&config).unwrap());
    }
}
