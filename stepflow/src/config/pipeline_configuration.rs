//! Pipeline-level configuration.

use super::merge::{apply_map, ConfigMap};
use super::Source;
use serde::{Deserialize, Serialize};

/// The merged configuration of a pipeline.
///
/// Hooks are stored as sources, never as functions, so the configuration can
/// always be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    /// The pipeline name.
    pub name: String,
    /// Whether caching is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cache: Option<bool>,
    /// Whether artifact metadata is collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_metadata: Option<bool>,
    /// Whether artifact visualizations are generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_visualization: Option<bool>,
    /// Settings keyed by settings key.
    #[serde(default)]
    pub settings: ConfigMap,
    /// Free-form extra configuration.
    #[serde(default)]
    pub extra: ConfigMap,
    /// Resolved failure hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_hook_source: Option<Source>,
    /// Resolved success hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_hook_source: Option<Source>,
}

impl PipelineConfiguration {
    /// Creates a configuration with only a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable_cache: None,
            enable_artifact_metadata: None,
            enable_artifact_visualization: None,
            settings: ConfigMap::new(),
            extra: ConfigMap::new(),
            failure_hook_source: None,
            success_hook_source: None,
        }
    }

    /// Returns a new configuration with `update` applied.
    ///
    /// With `merge` set, `settings` and `extra` are deep-unioned with the
    /// existing values; otherwise they are replaced. Scalar fields are
    /// overwritten whenever the update sets them.
    #[must_use]
    pub fn updated(&self, update: &PipelineConfigurationUpdate, merge: bool) -> Self {
        let mut config = self.clone();
        if update.enable_cache.is_some() {
            config.enable_cache = update.enable_cache;
        }
        if update.enable_artifact_metadata.is_some() {
            config.enable_artifact_metadata = update.enable_artifact_metadata;
        }
        if update.enable_artifact_visualization.is_some() {
            config.enable_artifact_visualization = update.enable_artifact_visualization;
        }
        if update.failure_hook_source.is_some() {
            config.failure_hook_source.clone_from(&update.failure_hook_source);
        }
        if update.success_hook_source.is_some() {
            config.success_hook_source.clone_from(&update.success_hook_source);
        }
        apply_map(&mut config.settings, update.settings.as_ref(), merge);
        apply_map(&mut config.extra, update.extra.as_ref(), merge);
        config
    }

    /// Returns whether caching is enabled for the pipeline.
    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.enable_cache != Some(false)
    }
}

/// An update to a pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfigurationUpdate {
    /// Whether caching is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cache: Option<bool>,
    /// Whether artifact metadata is collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_metadata: Option<bool>,
    /// Whether artifact visualizations are generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_visualization: Option<bool>,
    /// Settings to merge or replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ConfigMap>,
    /// Extra configuration to merge or replace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<ConfigMap>,
    /// Resolved failure hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_hook_source: Option<Source>,
    /// Resolved success hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_hook_source: Option<Source>,
}

impl PipelineConfigurationUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether caching is enabled.
    #[must_use]
    pub const fn with_enable_cache(mut self, enable_cache: bool) -> Self {
        self.enable_cache = Some(enable_cache);
        self
    }

    /// Sets whether artifact metadata is collected.
    #[must_use]
    pub const fn with_enable_artifact_metadata(mut self, enabled: bool) -> Self {
        self.enable_artifact_metadata = Some(enabled);
        self
    }

    /// Sets whether artifact visualizations are generated.
    #[must_use]
    pub const fn with_enable_artifact_visualization(mut self, enabled: bool) -> Self {
        self.enable_artifact_visualization = Some(enabled);
        self
    }

    /// Sets the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ConfigMap) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the extra configuration.
    #[must_use]
    pub fn with_extra(mut self, extra: ConfigMap) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Returns true if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
