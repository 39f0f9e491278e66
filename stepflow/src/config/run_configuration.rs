//! Run configuration: the per-run layer loaded from YAML and code.

use super::merge::{merge_maps, ConfigMap};
use super::{Schedule, StepConfigurationUpdate};
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Configuration for one pipeline run.
///
/// The same shape is used for YAML files and for overrides passed in code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineRunConfiguration {
    /// Run name template; may contain `{date}` and `{time}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    /// Whether caching is enabled for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cache: Option<bool>,
    /// Whether artifact metadata is collected for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_metadata: Option<bool>,
    /// Whether artifact visualizations are generated for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_visualization: Option<bool>,
    /// Schedule to register instead of running once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Existing build to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Uuid>,
    /// Step overrides keyed by invocation id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub steps: BTreeMap<String, StepConfigurationUpdate>,
    /// Pipeline-level settings.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub settings: ConfigMap,
    /// Pipeline-level extra configuration.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub extra: ConfigMap,
}

impl PipelineRunConfiguration {
    /// Creates an empty run configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRunConfiguration` if the document does not match the
    /// run configuration shape.
    pub fn from_yaml_str(yaml: &str, source_name: &str) -> Result<Self, ConfigurationError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ConfigurationError::InvalidRunConfiguration {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })
    }

    /// Reads and parses a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRunConfiguration` if the file cannot be read or parsed.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigurationError> {
        let source_name = path.display().to_string();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::InvalidRunConfiguration {
                source_name: source_name.clone(),
                message: e.to_string(),
            }
        })?;
        Self::from_yaml_str(&yaml, &source_name)
    }

    /// Builds the effective run configuration.
    ///
    /// Starts from defaults, layers the optional file and then the in-code
    /// overrides, which take precedence.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRunConfiguration` if the file cannot be loaded.
    pub fn load(config_path: Option<&Path>, overrides: Self) -> Result<Self, ConfigurationError> {
        let base = match config_path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        Ok(base.layered(overrides))
    }

    /// Returns a configuration with `update` layered on top.
    ///
    /// Scalars are overwritten when the update sets them; settings, extra
    /// and step overrides are deep-unioned.
    #[must_use]
    pub fn layered(mut self, update: Self) -> Self {
        if update.run_name.is_some() {
            self.run_name = update.run_name;
        }
        if update.enable_cache.is_some() {
            self.enable_cache = update.enable_cache;
        }
        if update.enable_artifact_metadata.is_some() {
            self.enable_artifact_metadata = update.enable_artifact_metadata;
        }
        if update.enable_artifact_visualization.is_some() {
            self.enable_artifact_visualization = update.enable_artifact_visualization;
        }
        if update.schedule.is_some() {
            self.schedule = update.schedule;
        }
        if update.build.is_some() {
            self.build = update.build;
        }
        merge_maps(&mut self.settings, update.settings);
        merge_maps(&mut self.extra, update.extra);
        for (step, step_update) in update.steps {
            let layered = self.steps.remove(&step).unwrap_or_default().layered(&step_update);
            self.steps.insert(step, layered);
        }
        self
    }

    /// Sets the run name template.
    #[must_use]
    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    /// Sets whether caching is enabled.
    #[must_use]
    pub const fn with_enable_cache(mut self, enable_cache: bool) -> Self {
        self.enable_cache = Some(enable_cache);
        self
    }

    /// Sets the schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Sets the build to use.
    #[must_use]
    pub const fn with_build(mut self, build: Uuid) -> Self {
        self.build = Some(build);
        self
    }

    /// Sets a pipeline-level settings entry.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Sets a pipeline-level extra entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Sets the override for one step.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>, update: StepConfigurationUpdate) -> Self {
        self.steps.insert(step.into(), update);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    const YAML: &str = r"
run_name: nightly-{date}
enable_cache: false
settings:
  docker:
    requirements: [numpy]
steps:
  trainer:
    parameters:
      lr: 0.1
extra:
  owner: data-team
";

    #[test]
    fn test_from_yaml_str() {
        let config = PipelineRunConfiguration::from_yaml_str(YAML, "inline").unwrap();

        assert_eq!(config.run_name.as_deref(), Some("nightly-{date}"));
        assert_eq!(config.enable_cache, Some(false));
        assert_eq!(config.steps["trainer"].parameters["lr"], json!(0.1));
        assert_eq!(config.extra["owner"], json!("data-team"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = PipelineRunConfiguration::from_yaml_str("enable_cashe: true", "run.yaml").unwrap_err();
        assert!(err.to_string().contains("run.yaml"));
    }

    #[test]
    fn test_code_overrides_take_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let overrides = PipelineRunConfiguration::new()
            .with_enable_cache(true)
            .with_setting("docker", json!({"parent_image": "python:3.11"}))
            .with_step(
                "trainer",
                StepConfigurationUpdate::new().with_parameter("epochs", json!(3)),
            );

        let config = PipelineRunConfiguration::load(Some(file.path()), overrides).unwrap();

        assert_eq!(config.enable_cache, Some(true));
        assert_eq!(config.run_name.as_deref(), Some("nightly-{date}"));
        assert_eq!(
            config.settings["docker"],
            json!({"requirements": ["numpy"], "parent_image": "python:3.11"})
        );
        assert_eq!(config.steps["trainer"].parameters.len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineRunConfiguration::load(Some(Path::new("/nonexistent/run.yaml")), PipelineRunConfiguration::new())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRunConfiguration { .. }));
    }

    #[test]
    fn test_empty_document() {
        let config = PipelineRunConfiguration::from_yaml_str("\n", "empty.yaml").unwrap();
        assert_eq!(config, PipelineRunConfiguration::default());
    }
}
