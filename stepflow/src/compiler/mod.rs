//! Compilation of prepared pipelines into deployments and specs.
//!
//! The compiler walks the invocation graph in insertion order and layers
//! step configuration in increasing precedence:
//!
//! 1. step defaults
//! 2. pipeline-level configuration
//! 3. run-level step overrides
//! 4. configuration passed when the step was invoked

mod deployment;
mod spec;

pub use deployment::{DeploymentStep, PipelineDeployment};
pub use spec::{InputSpec, PipelineSpec, StepSpec, SPEC_VERSION};

use crate::config::{
    validate_setting_keys, ArtifactConfiguration, PipelineConfiguration,
    PipelineConfigurationUpdate, PipelineRunConfiguration, StepConfiguration,
    StepConfigurationUpdate,
};
use crate::errors::{ConfigurationError, StepflowError};
use crate::pipeline::Pipeline;
use crate::stack::Stack;
use crate::steps::{MaterializerRegistry, StepInvocation};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Returns the default run name template for a pipeline.
#[must_use]
pub fn default_run_name_template(pipeline_name: &str) -> String {
    format!("{pipeline_name}-{{date}}-{{time}}")
}

/// Substitutes `{date}` and `{time}` in a run name template.
#[must_use]
pub fn format_name_template(template: &str, now: DateTime<Utc>) -> String {
    template
        .replace("{date}", &now.format("%Y_%m_%d").to_string())
        .replace("{time}", &now.format("%H_%M_%S_%6f").to_string())
}

/// Compiles pipelines.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    materializers: MaterializerRegistry,
}

impl Compiler {
    /// Creates a compiler with the built-in materializers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compiler with a custom materializer registry.
    #[must_use]
    pub const fn with_materializers(materializers: MaterializerRegistry) -> Self {
        Self { materializers }
    }

    /// Prepares the pipeline if needed, loads its run configuration and
    /// compiles it for `stack`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid user input, or a
    /// compilation error for internal inconsistencies.
    pub fn compile(
        &self,
        pipeline: &mut Pipeline,
        stack: &dyn Stack,
    ) -> Result<(PipelineDeployment, PipelineSpec), StepflowError> {
        pipeline.prepare_if_possible()?;

        let options = pipeline.run_options();
        let run_configuration = PipelineRunConfiguration::load(
            options.config_path.as_deref(),
            options.run_configuration.clone(),
        )?;

        self.compile_with(pipeline, stack, &run_configuration)
    }

    /// Compiles a prepared pipeline with an explicit run configuration.
    ///
    /// # Errors
    ///
    /// See [`Compiler::compile`].
    pub fn compile_with(
        &self,
        pipeline: &Pipeline,
        stack: &dyn Stack,
        run_configuration: &PipelineRunConfiguration,
    ) -> Result<(PipelineDeployment, PipelineSpec), StepflowError> {
        let name = pipeline.name();
        let graph = pipeline
            .invocations()
            .ok_or_else(|| ConfigurationError::NotPrepared {
                pipeline: name.to_string(),
            })?;

        let pipeline_configuration = pipeline
            .configuration()
            .updated(&run_level_update(run_configuration), true);

        let stack_keys = stack.setting_keys();
        validate_setting_keys(name, pipeline_configuration.settings.keys(), Some(&stack_keys))?;

        if let Some(unknown) = run_configuration.steps.keys().find(|id| !graph.contains(id)) {
            return Err(ConfigurationError::UnknownStep {
                pipeline: name.to_string(),
                step: unknown.clone(),
            }
            .into());
        }

        if let Some(schedule) = &run_configuration.schedule {
            schedule
                .validate()
                .map_err(|message| ConfigurationError::InvalidRunConfiguration {
                    source_name: format!("schedule of pipeline '{name}'"),
                    message,
                })?;
        }

        let steps = graph
            .iter()
            .map(|invocation| {
                self.compile_step(
                    name,
                    invocation,
                    &pipeline_configuration,
                    run_configuration.steps.get(&invocation.id),
                    &stack_keys,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let spec = PipelineSpec {
            version: SPEC_VERSION.to_string(),
            source: Some(pipeline.definition().source().clone()),
            parameters: pipeline.arguments().clone(),
            steps: steps.iter().map(|step| step.spec.clone()).collect(),
        };

        let run_name_template = run_configuration
            .run_name
            .clone()
            .unwrap_or_else(|| default_run_name_template(name));

        let deployment = PipelineDeployment::new(
            run_name_template,
            pipeline_configuration,
            steps,
            pipeline.arguments().clone(),
            stack.id(),
            run_configuration.schedule.clone(),
            run_configuration.build,
        );

        info!(
            pipeline = %name,
            steps = deployment.steps().len(),
            stack = %stack.name(),
            "Compiled pipeline"
        );
        Ok((deployment, spec))
    }

    fn compile_step(
        &self,
        pipeline: &str,
        invocation: &StepInvocation,
        pipeline_configuration: &PipelineConfiguration,
        run_override: Option<&StepConfigurationUpdate>,
        stack_keys: &BTreeSet<String>,
    ) -> Result<DeploymentStep, StepflowError> {
        let step = &invocation.step;
        let signature = step.signature();

        let mut layers = step.configuration().clone();
        layers.apply(&pipeline_layer(pipeline_configuration), true);
        if let Some(run_override) = run_override {
            layers.apply(run_override, true);
        }
        layers.apply(&invocation.configuration, true);
        for (key, value) in &invocation.parameters {
            layers.parameters.insert(key.clone(), value.clone());
        }
        if layers.failure_hook_source.is_none() {
            layers
                .failure_hook_source
                .clone_from(&pipeline_configuration.failure_hook_source);
        }
        if layers.success_hook_source.is_none() {
            layers
                .success_hook_source
                .clone_from(&pipeline_configuration.success_hook_source);
        }
        debug!(
            pipeline = %pipeline,
            step = %invocation.id,
            settings = layers.settings.len(),
            parameters = layers.parameters.len(),
            "Merged step configuration layers"
        );

        validate_setting_keys(pipeline, layers.settings.keys(), Some(stack_keys))?;

        let invalid_inputs = |message: String| ConfigurationError::InvalidStepInputs {
            pipeline: pipeline.to_string(),
            step: invocation.id.clone(),
            message,
        };
        if let Some(unknown) = layers
            .parameters
            .keys()
            .find(|key| !signature.parameters.contains_key(*key))
        {
            return Err(invalid_inputs(format!("the step has no parameter named '{unknown}'")).into());
        }
        for (parameter, default) in &signature.parameters {
            if layers.parameters.contains_key(parameter) {
                continue;
            }
            match default {
                Some(value) => {
                    layers.parameters.insert(parameter.clone(), value.clone());
                }
                None => {
                    return Err(invalid_inputs(format!("missing value for parameter '{parameter}'")).into())
                }
            }
        }

        if let Some(unknown) = layers
            .outputs
            .keys()
            .find(|output| !signature.outputs.contains_key(*output))
        {
            return Err(ConfigurationError::UnknownOutput {
                pipeline: pipeline.to_string(),
                step: invocation.id.clone(),
                output: unknown.clone(),
            }
            .into());
        }

        let mut outputs = BTreeMap::new();
        for (output, type_name) in &signature.outputs {
            let configured = layers
                .outputs
                .get(output)
                .and_then(|update| update.materializer_source.clone());
            let materializer_source = configured
                .or_else(|| self.materializers.default_for(type_name).cloned())
                .ok_or_else(|| ConfigurationError::MissingMaterializer {
                    pipeline: pipeline.to_string(),
                    step: invocation.id.clone(),
                    output: output.clone(),
                    type_name: type_name.clone(),
                })?;
            outputs.insert(
                output.clone(),
                ArtifactConfiguration {
                    type_name: type_name.clone(),
                    materializer_source,
                },
            );
        }

        let mut config = StepConfiguration::from_layers(invocation.id.clone(), &layers);
        config.outputs = outputs;
        config.external_input_artifacts = invocation
            .external_artifacts
            .iter()
            .map(|(name, artifact)| (name.clone(), artifact.resolve()))
            .collect();

        let spec = StepSpec {
            source: step.source().clone(),
            upstream_steps: invocation.upstream_steps.iter().cloned().collect(),
            inputs: invocation
                .input_artifacts
                .iter()
                .map(|(name, artifact)| {
                    (
                        name.clone(),
                        InputSpec {
                            step_name: artifact.invocation_id.clone(),
                            output_name: artifact.output_name.clone(),
                        },
                    )
                })
                .collect(),
            pipeline_parameter_name: invocation.id.clone(),
        };

        Ok(DeploymentStep { spec, config })
    }
}

fn run_level_update(run: &PipelineRunConfiguration) -> PipelineConfigurationUpdate {
    PipelineConfigurationUpdate {
        enable_cache: run.enable_cache,
        enable_artifact_metadata: run.enable_artifact_metadata,
        enable_artifact_visualization: run.enable_artifact_visualization,
        settings: (!run.settings.is_empty()).then(|| run.settings.clone()),
        extra: (!run.extra.is_empty()).then(|| run.extra.clone()),
        failure_hook_source: None,
        success_hook_source: None,
    }
}

fn pipeline_layer(configuration: &PipelineConfiguration) -> StepConfigurationUpdate {
    StepConfigurationUpdate {
        enable_cache: configuration.enable_cache,
        enable_artifact_metadata: configuration.enable_artifact_metadata,
        enable_artifact_visualization: configuration.enable_artifact_visualization,
        settings: configuration.settings.clone(),
        extra: configuration.extra.clone(),
        ..StepConfigurationUpdate::default()
    }
}
