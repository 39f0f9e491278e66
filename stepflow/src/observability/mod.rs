//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them install a subscriber with [`init_logging`].

use crate::config::EnvironmentConfig;
use std::env;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Subscriber options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, such as `info` or `stepflow=debug`.
    pub filter: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
    /// Include the event target.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Builds the options from the environment controls.
    ///
    /// `RUST_LOG` overrides the configured verbosity.
    #[must_use]
    pub fn from_environment(environment: &EnvironmentConfig) -> Self {
        let filter = env::var(EnvFilter::DEFAULT_ENV)
            .ok()
            .or_else(|| environment.logging_verbosity.clone())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        Self {
            filter,
            json: environment.json_logs,
            ..Self::default()
        }
    }

    /// Returns the parsed filter, falling back to `info` for an invalid
    /// directive.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs a global `fmt` subscriber.
///
/// Returns false if a global subscriber was already installed, in which case
/// nothing changes.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.with_target);

    if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_environment() {
        let environment = EnvironmentConfig {
            logging_verbosity: Some("stepflow=debug".to_string()),
            json_logs: true,
            ..EnvironmentConfig::default()
        };
        let config = LoggingConfig::from_environment(&environment);

        assert!(config.json);
        if env::var(EnvFilter::DEFAULT_ENV).is_err() {
            assert_eq!(config.filter, "stepflow=debug");
        }
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let config = LoggingConfig {
            filter: "stepflow=loud".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(
            config.env_filter().max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::INFO)
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
