//! Step-level configuration layers and the resolved step configuration.

use super::merge::{apply_map, ConfigMap};
use super::Source;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Partial output configuration supplied by a configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfigurationUpdate {
    /// Materializer to use for this output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materializer_source: Option<Source>,
}

/// Resolved configuration of one step output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfiguration {
    /// The declared output type.
    pub type_name: String,
    /// The materializer that stores values of this output.
    pub materializer_source: Source,
}

/// Resolved reference to an externally supplied artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalArtifactConfiguration {
    /// Id of an artifact that already exists in the artifact store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Inline value to upload before the step runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Content hash identifying the artifact.
    pub content_hash: String,
    /// Materializer used to upload an inline value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materializer_source: Option<Source>,
}

/// One layer of step configuration.
///
/// Layers are stacked in precedence order: step defaults, pipeline-level
/// settings, run-level step overrides and finally configuration passed when
/// the step was invoked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfigurationUpdate {
    /// Whether caching is enabled for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cache: Option<bool>,
    /// Whether artifact metadata is collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_metadata: Option<bool>,
    /// Whether artifact visualizations are generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_artifact_visualization: Option<bool>,
    /// Name of the experiment tracker component to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_tracker: Option<String>,
    /// Name of the step operator component to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_operator: Option<String>,
    /// Parameter values.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub parameters: ConfigMap,
    /// Settings keyed by settings key.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub settings: ConfigMap,
    /// Free-form extra configuration.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub extra: ConfigMap,
    /// Resolved failure hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_hook_source: Option<Source>,
    /// Resolved success hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_hook_source: Option<Source>,
    /// Per-output configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ArtifactConfigurationUpdate>,
}

impl StepConfigurationUpdate {
    /// Creates an empty layer.
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

    /// Sets a parameter value.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Sets a settings entry.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Sets an extra entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Sets the materializer for one output.
    #[must_use]
    pub fn with_output_materializer(mut self, output: impl Into<String>, source: Source) -> Self {
        self.outputs.insert(
            output.into(),
            ArtifactConfigurationUpdate {
                materializer_source: Some(source),
            },
        );
        self
    }

    /// Applies `other` on top of this layer.
    ///
    /// With `merge` set, mappings are deep-unioned; otherwise every field
    /// that `other` sets replaces the existing value wholesale.
    pub fn apply(&mut self, other: &Self, merge: bool) {
        overwrite(&mut self.enable_cache, other.enable_cache);
        overwrite(&mut self.enable_artifact_metadata, other.enable_artifact_metadata);
        overwrite(
            &mut self.enable_artifact_visualization,
            other.enable_artifact_visualization,
        );
        overwrite_clone(&mut self.experiment_tracker, &other.experiment_tracker);
        overwrite_clone(&mut self.step_operator, &other.step_operator);
        overwrite_clone(&mut self.failure_hook_source, &other.failure_hook_source);
        overwrite_clone(&mut self.success_hook_source, &other.success_hook_source);

        apply_map(&mut self.parameters, non_empty(&other.parameters), merge);
        apply_map(&mut self.settings, non_empty(&other.settings), merge);
        apply_map(&mut self.extra, non_empty(&other.extra), merge);

        if !other.outputs.is_empty() {
            if !merge {
                self.outputs.clear();
            }
            for (name, output) in &other.outputs {
                let entry = self.outputs.entry(name.clone()).or_default();
                overwrite_clone(&mut entry.materializer_source, &output.materializer_source);
            }
        }
    }

    /// Returns a new layer with `other` merged on top.
    #[must_use]
    pub fn layered(mut self, other: &Self) -> Self {
        self.apply(other, true);
        self
    }
}

fn overwrite<T: Copy>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

fn overwrite_clone<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        target.clone_from(value);
    }
}

fn non_empty(map: &ConfigMap) -> Option<&ConfigMap> {
    (!map.is_empty()).then_some(map)
}

/// The fully resolved configuration of one step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfiguration {
    /// The invocation id.
    pub name: String,
    /// Whether caching is enabled.
    pub enable_cache: Option<bool>,
    /// Whether artifact metadata is collected.
    pub enable_artifact_metadata: Option<bool>,
    /// Whether artifact visualizations are generated.
    pub enable_artifact_visualization: Option<bool>,
    /// Experiment tracker component name.
    pub experiment_tracker: Option<String>,
    /// Step operator component name.
    pub step_operator: Option<String>,
    /// Parameter values.
    pub parameters: ConfigMap,
    /// Settings keyed by settings key.
    pub settings: ConfigMap,
    /// Free-form extra configuration.
    pub extra: ConfigMap,
    /// Resolved failure hook.
    pub failure_hook_source: Option<Source>,
    /// Resolved success hook.
    pub success_hook_source: Option<Source>,
    /// Resolved outputs.
    pub outputs: BTreeMap<String, ArtifactConfiguration>,
    /// Resolved external input artifacts.
    pub external_input_artifacts: BTreeMap<String, ExternalArtifactConfiguration>,
}

impl StepConfiguration {
    /// Builds a configuration from a fully layered update.
    ///
    /// Outputs and external artifacts are resolved separately by the compiler.
    #[must_use]
    pub fn from_layers(name: impl Into<String>, layers: &StepConfigurationUpdate) -> Self {
        Self {
            name: name.into(),
            enable_cache: layers.enable_cache,
            enable_artifact_metadata: layers.enable_artifact_metadata,
            enable_artifact_visualization: layers.enable_artifact_visualization,
            experiment_tracker: layers.experiment_tracker.clone(),
            step_operator: layers.step_operator.clone(),
            parameters: layers.parameters.clone(),
            settings: layers.settings.clone(),
            extra: layers.extra.clone(),
            failure_hook_source: layers.failure_hook_source.clone(),
            success_hook_source: layers.success_hook_source.clone(),
            outputs: BTreeMap::new(),
            external_input_artifacts: BTreeMap::new(),
        }
    }

    /// Returns whether results of this step may be reused from the cache.
    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.enable_cache.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_layer_precedence() {
        let defaults = StepConfigurationUpdate::new()
            .with_enable_cache(true)
            .with_setting("resources", json!({"cpu_count": 1, "memory": "1GB"}));
        let override_layer = StepConfigurationUpdate::new()
            .with_enable_cache(false)
            .with_setting("resources", json!({"cpu_count": 4}));

        let layered = defaults.layered(&override_layer);

        assert_eq!(layered.enable_cache, Some(false));
        assert_eq!(
            layered.settings["resources"],
            json!({"cpu_count": 4, "memory": "1GB"})
        );
    }

    #[test]
    fn test_replace_mode() {
        let mut base = StepConfigurationUpdate::new()
            .with_extra("a", json!(1))
            .with_parameter("lr", json!(0.1));
        let update = StepConfigurationUpdate::new().with_extra("b", json!(2));

        base.apply(&update, false);

        assert_eq!(base.extra.len(), 1);
        assert_eq!(base.extra["b"], json!(2));
        // Fields the update does not set are kept.
        assert_eq!(base.parameters["lr"], json!(0.1));
    }

    #[test]
    fn test_output_materializer_override() {
        let base = StepConfigurationUpdate::new()
            .with_output_materializer("output", Source::new("m", "Default"));
        let layered = base.layered(
            &StepConfigurationUpdate::new().with_output_materializer("output", Source::new("m", "Custom")),
        );

        assert_eq!(
            layered.outputs["output"].materializer_source,
            Some(Source::new("m", "Custom"))
        );
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let parsed: Result<StepConfigurationUpdate, _> =
            serde_json::from_value(json!({"enable_cache": true, "enable_cash": false}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cache_enabled_default() {
        let config = StepConfiguration::from_layers("trainer", &StepConfigurationUpdate::new());
        assert!(config.cache_enabled());

        let disabled = StepConfiguration::from_layers(
            "trainer",
            &StepConfigurationUpdate::new().with_enable_cache(false),
        );
        assert!(!disabled.cache_enabled());
    }
}
