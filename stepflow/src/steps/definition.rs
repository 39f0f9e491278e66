//! Step definitions.
//!
//! A step is described by a fixed interface rather than generated at runtime:
//! its portable source, its raw source code (which feeds version hashes and
//! cache keys), its signature and its default configuration.

use crate::config::{
    resolve_hook, validate_setting_keys, ConfigMap, HookSpecification, Source,
    StepConfigurationUpdate,
};
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Inputs, outputs and parameters of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSignature {
    /// Input artifact names and their type names.
    pub inputs: BTreeMap<String, String>,
    /// Output artifact names and their type names.
    pub outputs: BTreeMap<String, String>,
    /// Parameter names and their default values.
    pub parameters: BTreeMap<String, Option<Value>>,
}

/// Trait for step definitions.
///
/// Definitions are immutable and shared by every invocation of the step.
pub trait StepDefinition: Send + Sync + Debug {
    /// Returns the declared name of the step.
    fn name(&self) -> &str;

    /// Returns the portable reference to the step function.
    fn source(&self) -> &Source;

    /// Returns the raw source code of the step function.
    fn source_code(&self) -> &str;

    /// Returns the step documentation.
    fn docstring(&self) -> Option<&str> {
        None
    }

    /// Returns the step signature.
    fn signature(&self) -> &StepSignature;

    /// Returns the step-level configuration defaults.
    fn configuration(&self) -> &StepConfigurationUpdate;
}

/// The concrete step produced by [`step`].
#[derive(Debug, Clone)]
pub struct FnStep {
    name: String,
    source: Source,
    source_code: String,
    docstring: Option<String>,
    signature: StepSignature,
    configuration: StepConfigurationUpdate,
}

impl StepDefinition for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> &Source {
        &self.source
    }

    fn source_code(&self) -> &str {
        &self.source_code
    }

    fn docstring(&self) -> Option<&str> {
        self.docstring.as_deref()
    }

    fn signature(&self) -> &StepSignature {
        &self.signature
    }

    fn configuration(&self) -> &StepConfigurationUpdate {
        &self.configuration
    }
}

/// Starts building a step definition.
///
/// ```rust,ignore
/// let trainer = step("trainer")
///     .source(Source::new("steps.training", "trainer"))
///     .source_code(TRAINER_SOURCE)
///     .input("dataset", "dict")
///     .output("model", "dict")
///     .parameter("lr", Some(json!(0.01)))
///     .build()?;
/// ```
#[must_use]
pub fn step(name: impl Into<String>) -> StepBuilder {
    StepBuilder::new(name)
}

/// Builder for [`FnStep`].
#[derive(Debug, Clone)]
pub struct StepBuilder {
    name: String,
    source: Option<Source>,
    source_code: String,
    docstring: Option<String>,
    signature: StepSignature,
    configuration: StepConfigurationUpdate,
    on_failure: Option<HookSpecification>,
    on_success: Option<HookSpecification>,
}

impl StepBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            source_code: String::new(),
            docstring: None,
            signature: StepSignature::default(),
            configuration: StepConfigurationUpdate::default(),
            on_failure: None,
            on_success: None,
        }
    }

    /// Sets the portable source of the step function.
    #[must_use]
    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the raw source code of the step function.
    #[must_use]
    pub fn source_code(mut self, code: impl Into<String>) -> Self {
        self.source_code = code.into();
        self
    }

    /// Sets the documentation.
    #[must_use]
    pub fn docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    /// Declares an input artifact.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.signature.inputs.insert(name.into(), type_name.into());
        self
    }

    /// Declares an output artifact.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.signature.outputs.insert(name.into(), type_name.into());
        self
    }

    /// Declares a parameter with an optional default.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.signature.parameters.insert(name.into(), default);
        self
    }

    /// Sets whether caching is enabled by default.
    #[must_use]
    pub const fn enable_cache(mut self, enabled: bool) -> Self {
        self.configuration.enable_cache = Some(enabled);
        self
    }

    /// Sets whether artifact metadata is collected by default.
    #[must_use]
    pub const fn enable_artifact_metadata(mut self, enabled: bool) -> Self {
        self.configuration.enable_artifact_metadata = Some(enabled);
        self
    }

    /// Sets whether artifact visualizations are generated by default.
    #[must_use]
    pub const fn enable_artifact_visualization(mut self, enabled: bool) -> Self {
        self.configuration.enable_artifact_visualization = Some(enabled);
        self
    }

    /// Sets the experiment tracker component.
    #[must_use]
    pub fn experiment_tracker(mut self, name: impl Into<String>) -> Self {
        self.configuration.experiment_tracker = Some(name.into());
        self
    }

    /// Sets the step operator component.
    #[must_use]
    pub fn step_operator(mut self, name: impl Into<String>) -> Self {
        self.configuration.step_operator = Some(name.into());
        self
    }

    /// Sets the materializer for one output.
    #[must_use]
    pub fn output_materializer(mut self, output: impl Into<String>, source: Source) -> Self {
        self.configuration = self.configuration.with_output_materializer(output, source);
        self
    }

    /// Sets default settings.
    #[must_use]
    pub fn settings(mut self, settings: ConfigMap) -> Self {
        self.configuration.settings = settings;
        self
    }

    /// Sets default extra configuration.
    #[must_use]
    pub fn extra(mut self, extra: ConfigMap) -> Self {
        self.configuration.extra = extra;
        self
    }

    /// Sets the failure hook.
    #[must_use]
    pub fn on_failure(mut self, hook: impl Into<HookSpecification>) -> Self {
        self.on_failure = Some(hook.into());
        self
    }

    /// Sets the success hook.
    #[must_use]
    pub fn on_success(mut self, hook: impl Into<HookSpecification>) -> Self {
        self.on_success = Some(hook.into());
        self
    }

    /// Validates the definition and builds the step.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name, invalid settings keys, hooks that
    /// cannot be resolved or materializers configured for undeclared outputs.
    pub fn build(self) -> Result<Arc<dyn StepDefinition>, ConfigurationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigurationError::EmptyName {
                kind: "Step".to_string(),
            });
        }

        validate_setting_keys(&name, self.configuration.settings.keys(), None)?;

        if let Some(output) = self
            .configuration
            .outputs
            .keys()
            .find(|output| !self.signature.outputs.contains_key(*output))
        {
            return Err(ConfigurationError::UnknownOutput {
                pipeline: String::new(),
                step: name,
                output: output.clone(),
            });
        }

        let mut configuration = self.configuration;
        if let Some(hook) = &self.on_failure {
            configuration.failure_hook_source = Some(resolve_hook(hook, &name, "on_failure")?);
        }
        if let Some(hook) = &self.on_success {
            configuration.success_hook_source = Some(resolve_hook(hook, &name, "on_success")?);
        }

        let source = self
            .source
            .unwrap_or_else(|| Source::new("__main__", name.clone()));

        Ok(Arc::new(FnStep {
            name,
            source,
            source_code: self.source_code,
            docstring: self.docstring,
            signature: self.signature,
            configuration,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_step() {
        let trainer = step("trainer")
            .source(Source::new("steps.training", "trainer"))
            .source_code("fn trainer(dataset) -> model")
            .input("dataset", "dict")
            .output("model", "dict")
            .parameter("lr", Some(json!(0.01)))
            .enable_cache(false)
            .on_failure("hooks.alerts.notify")
            .build()
            .unwrap();

        assert_eq!(trainer.name(), "trainer");
        assert_eq!(trainer.source().import_path(), "steps.training.trainer");
        assert_eq!(trainer.signature().outputs["model"], "dict");
        assert_eq!(trainer.configuration().enable_cache, Some(false));
        assert_eq!(
            trainer.configuration().failure_hook_source,
            Some(Source::new("hooks.alerts", "notify"))
        );
    }

    #[test]
    fn test_default_source() {
        let loader = step("loader").build().unwrap();
        assert_eq!(loader.source().import_path(), "__main__.loader");
    }

    #[test]
    fn test_empty_name_fails() {
        assert!(step("  ").build().is_err());
    }

    #[test]
    fn test_invalid_hook_fails() {
        let err = step("loader").on_success("notify").build().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidHook { .. }));
    }

    #[test]
    fn test_materializer_for_unknown_output_fails() {
        let err = step("loader")
            .output("data", "dict")
            .output_materializer("dataset", Source::new("m", "Custom"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownOutput { ref output, .. } if output == "dataset"));
    }

    #[test]
    fn test_invalid_settings_key_fails() {
        let settings: ConfigMap = [("dockr".to_string(), json!({}))].into_iter().collect();
        assert!(step("loader").settings(settings).build().is_err());
    }
}
