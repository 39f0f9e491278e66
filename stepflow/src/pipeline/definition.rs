//! Pipeline definitions and prepared pipelines.

use super::{activation, PipelineContext, RunOptions, StepInvocationGraph};
use crate::config::{
    resolve_hook, validate_setting_keys, ConfigMap, HookSpecification, PipelineConfiguration,
    PipelineConfigurationUpdate, Source,
};
use crate::coordinator::{Coordinator, RunOutcome};
use crate::errors::{ConfigurationError, StepflowError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Arguments passed to a pipeline entrypoint.
pub type EntrypointArgs = ConfigMap;

/// The function that builds a pipeline's step invocation graph.
pub type Entrypoint = Arc<
    dyn Fn(&mut PipelineContext<'_>, &EntrypointArgs) -> Result<Value, StepflowError>
        + Send
        + Sync,
>;

/// The immutable part of a pipeline, shared by all option overlays.
#[derive(Clone)]
pub struct PipelineDefinition {
    name: String,
    entrypoint: Entrypoint,
    parameters: BTreeMap<String, Option<Value>>,
    source: Source,
    source_code: String,
    docstring: Option<String>,
}

impl fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDefinition")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl PipelineDefinition {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared entrypoint parameters and their defaults.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, Option<Value>> {
        &self.parameters
    }

    /// Returns the portable source of the entrypoint.
    #[must_use]
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Returns the raw source code of the entrypoint.
    #[must_use]
    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    /// Returns the pipeline documentation.
    #[must_use]
    pub fn docstring(&self) -> Option<&str> {
        self.docstring.as_deref()
    }

    /// Returns true if a parameter has no default.
    #[must_use]
    pub fn requires_parameters(&self) -> bool {
        self.parameters.values().any(Option::is_none)
    }

    /// Checks entrypoint arguments and fills in defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntrypointArguments` for unknown or missing arguments.
    pub fn bind_arguments(&self, args: EntrypointArgs) -> Result<EntrypointArgs, ConfigurationError> {
        let invalid = |message: String| ConfigurationError::InvalidEntrypointArguments {
            pipeline: self.name.clone(),
            message,
        };

        if let Some(unknown) = args.keys().find(|key| !self.parameters.contains_key(*key)) {
            return Err(invalid(format!("unexpected argument '{unknown}'")));
        }

        let mut bound = args;
        for (name, default) in &self.parameters {
            if bound.contains_key(name) {
                continue;
            }
            match default {
                Some(value) => {
                    bound.insert(name.clone(), value.clone());
                }
                None => return Err(invalid(format!("missing required argument '{name}'"))),
            }
        }
        Ok(bound)
    }
}

/// Result of calling a pipeline.
#[derive(Debug)]
pub enum PipelineCall {
    /// The pipeline was called from inside another pipeline's entrypoint.
    Nested(Value),
    /// The pipeline was prepared and run.
    Run(RunOutcome),
}

/// A pipeline: a shared definition plus its configuration, run options and
/// the graph of the latest preparation pass.
#[derive(Debug, Clone)]
pub struct Pipeline {
    definition: Arc<PipelineDefinition>,
    configuration: PipelineConfiguration,
    run_options: RunOptions,
    graph: Option<StepInvocationGraph>,
    arguments: EntrypointArgs,
}

impl Pipeline {
    /// Creates a pipeline from a name and an entrypoint.
    pub fn new<F>(name: impl Into<String>, entrypoint: F) -> Self
    where
        F: Fn(&mut PipelineContext<'_>, &EntrypointArgs) -> Result<Value, StepflowError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        Self {
            definition: Arc::new(PipelineDefinition {
                source: Source::new("__main__", name.clone()),
                name: name.clone(),
                entrypoint: Arc::new(entrypoint),
                parameters: BTreeMap::new(),
                source_code: String::new(),
                docstring: None,
            }),
            configuration: PipelineConfiguration::new(name),
            run_options: RunOptions::default(),
            graph: None,
            arguments: EntrypointArgs::new(),
        }
    }

    /// Declares an entrypoint parameter with an optional default.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        Arc::make_mut(&mut self.definition)
            .parameters
            .insert(name.into(), default);
        self
    }

    /// Sets the portable source of the entrypoint.
    #[must_use]
    pub fn with_source(mut self, source: Source) -> Self {
        Arc::make_mut(&mut self.definition).source = source;
        self
    }

    /// Sets the raw source code of the entrypoint.
    #[must_use]
    pub fn with_source_code(mut self, source_code: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.definition).source_code = source_code.into();
        self
    }

    /// Sets the documentation.
    #[must_use]
    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.definition).docstring = Some(docstring.into());
        self
    }

    /// Sets the failure hook.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHook` if the hook cannot be resolved to a source.
    pub fn on_failure(mut self, hook: impl Into<HookSpecification>) -> Result<Self, ConfigurationError> {
        let source = resolve_hook(&hook.into(), self.name(), "on_failure")?;
        self.configuration.failure_hook_source = Some(source);
        Ok(self)
    }

    /// Sets the success hook.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHook` if the hook cannot be resolved to a source.
    pub fn on_success(mut self, hook: impl Into<HookSpecification>) -> Result<Self, ConfigurationError> {
        let source = resolve_hook(&hook.into(), self.name(), "on_success")?;
        self.configuration.success_hook_source = Some(source);
        Ok(self)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Returns the shared definition.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Returns the current configuration.
    #[must_use]
    pub fn configuration(&self) -> &PipelineConfiguration {
        &self.configuration
    }

    /// Returns the run options.
    #[must_use]
    pub fn run_options(&self) -> &RunOptions {
        &self.run_options
    }

    /// Returns the arguments of the latest preparation pass.
    #[must_use]
    pub fn arguments(&self) -> &EntrypointArgs {
        &self.arguments
    }

    /// Returns the invocation graph of the latest preparation pass.
    #[must_use]
    pub fn invocations(&self) -> Option<&StepInvocationGraph> {
        self.graph.as_ref()
    }

    /// Returns the source code of the step behind an invocation.
    #[must_use]
    pub fn step_source_code(&self, invocation_id: &str) -> Option<&str> {
        self.graph
            .as_ref()?
            .get(invocation_id)
            .map(|invocation| invocation.step.source_code())
    }

    /// Updates the pipeline configuration.
    ///
    /// With `merge` set, settings and extra are deep-unioned with the current
    /// values; otherwise the fields set in `update` replace them.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSettingKey` if a settings key is malformed.
    pub fn configure(
        &mut self,
        update: &PipelineConfigurationUpdate,
        merge: bool,
    ) -> Result<&mut Self, ConfigurationError> {
        if let Some(settings) = &update.settings {
            validate_setting_keys(self.name(), settings.keys(), None)?;
        }
        debug!(pipeline = %self.name(), merge, "Updating pipeline configuration");
        self.configuration = self.configuration.updated(update, merge);
        Ok(self)
    }

    /// Returns a copy of this pipeline with `options` layered on its run
    /// options. The definition is shared.
    #[must_use]
    pub fn with_options(&self, options: RunOptions) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            configuration: self.configuration.clone(),
            run_options: self.run_options.clone().layered(options),
            graph: self.graph.clone(),
            arguments: self.arguments.clone(),
        }
    }

    /// Returns true if a preparation pass has completed.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.graph.is_some()
    }

    /// Returns true if the entrypoint has parameters without defaults.
    #[must_use]
    pub fn requires_parameters(&self) -> bool {
        self.definition.requires_parameters()
    }

    /// Runs the entrypoint and rebuilds the step invocation graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid, another pipeline is
    /// already active on this thread, or the entrypoint fails.
    pub fn prepare(&mut self, args: EntrypointArgs) -> Result<(), StepflowError> {
        if self.name().trim().is_empty() {
            return Err(ConfigurationError::EmptyName {
                kind: "Pipeline".to_string(),
            }
            .into());
        }

        self.graph = None;
        let arguments = self.definition.bind_arguments(args)?;
        let mut graph = StepInvocationGraph::new(self.name());

        {
            let _guard = activation::enter(self.name(), graph.pass_id())?;
            let mut ctx = PipelineContext::new(&mut graph);
            (self.definition.entrypoint)(&mut ctx, &arguments)?;
        }

        info!(
            pipeline = %self.name(),
            steps = graph.len(),
            "Prepared pipeline"
        );
        self.graph = Some(graph);
        self.arguments = arguments;
        Ok(())
    }

    /// Prepares the pipeline if it is not prepared yet.
    ///
    /// # Errors
    ///
    /// Returns `NotPrepared` if the entrypoint requires arguments, or any
    /// error from [`Pipeline::prepare`].
    pub fn prepare_if_possible(&mut self) -> Result<(), StepflowError> {
        if self.is_prepared() {
            return Ok(());
        }
        if self.requires_parameters() {
            return Err(ConfigurationError::NotPrepared {
                pipeline: self.name().to_string(),
            }
            .into());
        }
        self.prepare(EntrypointArgs::new())
    }

    /// Runs the entrypoint against a detached graph and returns its value.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid or the entrypoint fails.
    pub fn run_nested(&self, args: EntrypointArgs) -> Result<Value, StepflowError> {
        let arguments = self.definition.bind_arguments(args)?;
        let mut graph = StepInvocationGraph::detached(self.name());
        let mut ctx = PipelineContext::new(&mut graph);
        let value = (self.definition.entrypoint)(&mut ctx, &arguments)?;
        debug!(
            pipeline = %self.name(),
            discarded_steps = graph.len(),
            "Nested pipeline call returned"
        );
        Ok(value)
    }

    /// Calls the pipeline.
    ///
    /// Inside another pipeline's entrypoint this is a nested call and returns
    /// the entrypoint's value. Otherwise the pipeline is prepared with `args`
    /// and run through `coordinator`.
    ///
    /// # Errors
    ///
    /// Returns any preparation, compilation, registration or stack error.
    pub async fn call(
        &mut self,
        args: EntrypointArgs,
        coordinator: &Coordinator,
    ) -> Result<PipelineCall, StepflowError> {
        if activation::active_pipeline().is_some() {
            return self.run_nested(args).map(PipelineCall::Nested);
        }
        self.prepare(args)?;
        coordinator.run(self).await.map(PipelineCall::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{step, StepDefinition};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn loader() -> Arc<dyn StepDefinition> {
        step("loader").output("data", "dict").build().unwrap()
    }

    fn training() -> Pipeline {
        let loader = loader();
        Pipeline::new("training", move |ctx, args| {
            let rows = args.get("rows").cloned().unwrap_or(Value::Null);
            ctx.call(&loader).invoke()?;
            ctx.call(&loader).invoke()?;
            Ok(rows)
        })
        .with_parameter("rows", Some(json!(10)))
    }

    #[test]
    fn test_prepare_builds_graph() {
        let mut pipeline = training();
        assert!(!pipeline.is_prepared());

        pipeline.prepare(EntrypointArgs::new()).unwrap();

        assert!(pipeline.is_prepared());
        assert_eq!(pipeline.invocations().unwrap().ids(), vec!["loader", "loader_2"]);
        assert_eq!(pipeline.arguments()["rows"], json!(10));
        assert!(activation::active_pipeline().is_none());
    }

    #[test]
    fn test_prepare_rebuilds_graph() {
        let mut pipeline = training();
        pipeline.prepare(EntrypointArgs::new()).unwrap();
        let first = pipeline.invocations().unwrap().pass_id();
        pipeline.prepare(EntrypointArgs::new()).unwrap();

        assert_ne!(pipeline.invocations().unwrap().pass_id(), first);
        assert_eq!(pipeline.invocations().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_arguments() {
        let mut pipeline = training();
        let args: EntrypointArgs = [("cols".to_string(), json!(1))].into_iter().collect();
        let err = pipeline.prepare(args).unwrap_err();
        assert!(err.to_string().contains("cols"));
        assert!(!pipeline.is_prepared());
    }

    #[test]
    fn test_prepare_if_possible_requires_arguments() {
        let mut pipeline = Pipeline::new("training", |_, _| Ok(Value::Null))
            .with_parameter("rows", None);
        assert!(pipeline.requires_parameters());

        let err = pipeline.prepare_if_possible().unwrap_err();
        assert!(matches!(
            err,
            StepflowError::Configuration(ConfigurationError::NotPrepared { .. })
        ));
    }

    #[test]
    fn test_failed_entrypoint_releases_activation() {
        let mut pipeline = Pipeline::new("broken", |_, _| {
            Err(ConfigurationError::EmptyName {
                kind: "Step".to_string(),
            }
            .into())
        });

        assert!(pipeline.prepare(EntrypointArgs::new()).is_err());
        assert!(activation::active_pipeline().is_none());
        assert!(!pipeline.is_prepared());
    }

    #[test]
    fn test_configure_merge_and_replace() {
        let extra = |key: &str, value: i64| -> ConfigMap { [(key.to_string(), json!(value))].into_iter().collect() };

        let mut merged = training();
        merged
            .configure(&PipelineConfigurationUpdate::new().with_extra(extra("a", 1)), true)
            .unwrap()
            .configure(&PipelineConfigurationUpdate::new().with_extra(extra("b", 2)), true)
            .unwrap();
        assert_eq!(merged.configuration().extra.len(), 2);

        let mut replaced = training();
        replaced
            .configure(&PipelineConfigurationUpdate::new().with_extra(extra("a", 1)), true)
            .unwrap()
            .configure(&PipelineConfigurationUpdate::new().with_extra(extra("b", 2)), false)
            .unwrap();
        assert_eq!(replaced.configuration().extra, extra("b", 2));
    }

    #[test]
    fn test_with_options_shares_definition() {
        let pipeline = training();
        let overlay = pipeline.with_options(RunOptions::new().with_unlisted(true));

        assert!(overlay.run_options().unlisted);
        assert!(!pipeline.run_options().unlisted);
        assert!(std::ptr::eq(pipeline.definition(), overlay.definition()));
    }

    #[test]
    fn test_hooks_are_resolved() {
        let pipeline = training().on_failure("hooks.alerts.notify").unwrap();
        assert_eq!(
            pipeline.configuration().failure_hook_source,
            Some(Source::new("hooks.alerts", "notify"))
        );
        assert!(training().on_success("notify").is_err());
    }
}
