//! Environment-level controls.

use serde::{Deserialize, Serialize};

/// Suppresses `run` entirely when set.
///
/// Step workers set this so importing pipeline definitions never triggers a
/// recursive run.
pub const ENV_PREVENT_PIPELINE_EXECUTION: &str = "STEPFLOW_PREVENT_PIPELINE_EXECUTION";
/// Skips automatic pipeline registration during `run`.
pub const ENV_SKIP_PIPELINE_REGISTRATION: &str = "STEPFLOW_SKIP_PIPELINE_REGISTRATION";
/// Name of the default user created by the store bootstrap.
pub const ENV_DEFAULT_USER_NAME: &str = "STEPFLOW_DEFAULT_USER_NAME";
/// Name of the default workspace created by the store bootstrap.
pub const ENV_DEFAULT_WORKSPACE_NAME: &str = "STEPFLOW_DEFAULT_WORKSPACE_NAME";
/// Password of the default user created by the store bootstrap.
pub const ENV_DEFAULT_USER_PASSWORD: &str = "STEPFLOW_DEFAULT_USER_PASSWORD";
/// Log filter directive, e.g. `debug` or `stepflow=trace`.
pub const ENV_LOGGING_VERBOSITY: &str = "STEPFLOW_LOGGING_VERBOSITY";
/// Log output format, `text` or `json`.
pub const ENV_LOGGING_FORMAT: &str = "STEPFLOW_LOGGING_FORMAT";

const DEFAULT_NAME: &str = "default";

/// Parses a boolean environment value.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Snapshot of the environment controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Whether pipeline execution is suppressed.
    pub prevent_pipeline_execution: bool,
    /// Whether pipeline registration is skipped during runs.
    pub skip_pipeline_registration: bool,
    /// Default user name for the store bootstrap.
    pub default_user_name: String,
    /// Default workspace name for the store bootstrap.
    pub default_workspace_name: String,
    /// Default user password for the store bootstrap.
    pub default_user_password: Option<String>,
    /// Log filter directive.
    pub logging_verbosity: Option<String>,
    /// Whether logs are emitted as JSON.
    pub json_logs: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            prevent_pipeline_execution: false,
            skip_pipeline_registration: false,
            default_user_name: DEFAULT_NAME.to_string(),
            default_workspace_name: DEFAULT_NAME.to_string(),
            default_user_password: None,
            logging_verbosity: None,
            json_logs: false,
        }
    }
}

impl EnvironmentConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary lookup function.
    ///
    /// Unparseable booleans fall back to `false` with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key).is_some_and(|value| {
                parse_bool(&value).unwrap_or_else(|| {
                    tracing::warn!(variable = key, value = %value, "Ignoring unparseable boolean environment variable");
                    false
                })
            })
        };
        let defaults = Self::default();

        Self {
            prevent_pipeline_execution: flag(ENV_PREVENT_PIPELINE_EXECUTION),
            skip_pipeline_registration: flag(ENV_SKIP_PIPELINE_REGISTRATION),
            default_user_name: lookup(ENV_DEFAULT_USER_NAME).unwrap_or(defaults.default_user_name),
            default_workspace_name: lookup(ENV_DEFAULT_WORKSPACE_NAME)
                .unwrap_or(defaults.default_workspace_name),
            default_user_password: lookup(ENV_DEFAULT_USER_PASSWORD),
            logging_verbosity: lookup(ENV_LOGGING_VERBOSITY),
            json_logs: lookup(ENV_LOGGING_FORMAT)
                .is_some_and(|format| format.eq_ignore_ascii_case("json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" on "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_defaults() {
        let config = EnvironmentConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EnvironmentConfig::default());
        assert_eq!(config.default_user_name, "default");
    }

    #[test]
    fn test_flags_from_lookup() {
        let config = EnvironmentConfig::from_lookup(lookup(&[
            (ENV_PREVENT_PIPELINE_EXECUTION, "true"),
            (ENV_SKIP_PIPELINE_REGISTRATION, "garbage"),
            (ENV_DEFAULT_USER_NAME, "alice"),
            (ENV_LOGGING_FORMAT, "JSON"),
        ]));

        assert!(config.prevent_pipeline_execution);
        assert!(!config.skip_pipeline_registration);
        assert_eq!(config.default_user_name, "alice");
        assert!(config.json_logs);
    }
}
