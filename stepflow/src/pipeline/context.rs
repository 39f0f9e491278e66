//! The construction context handed to pipeline entrypoints.

use super::{EntrypointArgs, Pipeline, StepInvocationGraph};
use crate::config::StepConfigurationUpdate;
use crate::errors::{ConfigurationError, StepflowError};
use crate::steps::{
    ExternalArtifact, NewInvocation, StepArtifact, StepDefinition, StepOutputs,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Context through which an entrypoint invokes steps.
///
/// The context borrows the graph of the current preparation pass, so steps
/// can only be added while the entrypoint runs.
#[derive(Debug)]
pub struct PipelineContext<'g> {
    graph: &'g mut StepInvocationGraph,
}

impl<'g> PipelineContext<'g> {
    pub(crate) fn new(graph: &'g mut StepInvocationGraph) -> Self {
        Self { graph }
    }

    /// Returns the name of the pipeline under construction.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        self.graph.pipeline_name()
    }

    /// Returns the number of invocations added so far.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.graph.len()
    }

    /// Starts an invocation of `step`.
    pub fn call(&mut self, step: &Arc<dyn StepDefinition>) -> StepCall<'_> {
        StepCall {
            graph: &mut *self.graph,
            request: NewInvocation::new(Arc::clone(step)),
        }
    }

    /// Calls another pipeline from inside this entrypoint.
    ///
    /// The nested entrypoint runs against its own detached graph. None of its
    /// invocations are added to this pipeline; its return value is passed
    /// through.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the nested entrypoint or its arguments.
    pub fn call_pipeline(
        &mut self,
        pipeline: &Pipeline,
        args: EntrypointArgs,
    ) -> Result<Value, StepflowError> {
        pipeline.run_nested(args)
    }
}

/// Builder for one step invocation.
#[derive(Debug)]
#[must_use = "a step call does nothing until `invoke` is called"]
pub struct StepCall<'c> {
    graph: &'c mut StepInvocationGraph,
    request: NewInvocation,
}

impl StepCall<'_> {
    /// Passes an upstream artifact as input.
    pub fn input(mut self, name: impl Into<String>, artifact: StepArtifact) -> Self {
        self.request = self.request.with_input(name, artifact);
        self
    }

    /// Passes an external artifact as input.
    pub fn external(mut self, name: impl Into<String>, artifact: ExternalArtifact) -> Self {
        self.request = self.request.with_external(name, artifact);
        self
    }

    /// Sets a parameter value.
    pub fn parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.request = self.request.with_parameter(name, value);
        self
    }

    /// Runs this invocation after the invocation with id `id`.
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.request = self.request.with_upstream(id);
        self
    }

    /// Requests a specific invocation id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.request = self.request.with_id(id);
        self
    }

    /// Sets whether a suffix may be appended when the id is taken.
    pub fn allow_id_suffix(mut self, allow: bool) -> Self {
        self.request = self.request.with_allow_id_suffix(allow);
        self
    }

    /// Sets configuration for this invocation only.
    pub fn configure(mut self, configuration: StepConfigurationUpdate) -> Self {
        self.request = self.request.with_configuration(configuration);
        self
    }

    /// Validates the call against the step signature and adds the invocation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStepInputs` for unknown, duplicated or missing inputs
    /// and unknown parameters, or a graph error from the invocation graph.
    pub fn invoke(self) -> Result<StepOutputs, StepflowError> {
        validate_call(self.graph.pipeline_name(), &self.request)?;

        let step = Arc::clone(&self.request.step);
        let id = self.graph.add_step_invocation(self.request)?;

        let artifacts: BTreeMap<String, StepArtifact> = step
            .signature()
            .outputs
            .keys()
            .map(|output| {
                (
                    output.clone(),
                    StepArtifact {
                        invocation_id: id.clone(),
                        output_name: output.clone(),
                        pipeline_name: self.graph.pipeline_name().to_string(),
                        pass_id: self.graph.pass_id(),
                    },
                )
            })
            .collect();

        Ok(StepOutputs::new(
            id,
            self.graph.pipeline_name().to_string(),
            artifacts,
        ))
    }
}

fn validate_call(pipeline: &str, request: &NewInvocation) -> Result<(), ConfigurationError> {
    let signature = request.step.signature();
    let invalid = |message: String| ConfigurationError::InvalidStepInputs {
        pipeline: pipeline.to_string(),
        step: request.base_id().to_string(),
        message,
    };

    let supplied = request
        .input_artifacts
        .keys()
        .chain(request.external_artifacts.keys());
    for name in supplied {
        if !signature.inputs.contains_key(name) {
            return Err(invalid(format!("the step has no input named '{name}'")));
        }
    }

    if let Some(name) = request
        .input_artifacts
        .keys()
        .find(|name| request.external_artifacts.contains_key(*name))
    {
        return Err(invalid(format!("input '{name}' was supplied twice")));
    }

    if let Some(name) = signature.inputs.keys().find(|name| {
        !request.input_artifacts.contains_key(*name) && !request.external_artifacts.contains_key(*name)
    }) {
        return Err(invalid(format!("missing input '{name}'")));
    }

    if let Some(name) = request
        .parameters
        .keys()
        .find(|name| !signature.parameters.contains_key(*name))
    {
        return Err(invalid(format!("the step has no parameter named '{name}'")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::activation;
    use crate::steps::step;
    use serde_json::json;

    fn loader() -> Arc<dyn StepDefinition> {
        step("loader").output("data", "dict").build().unwrap()
    }

    fn trainer() -> Arc<dyn StepDefinition> {
        step("trainer")
            .input("data", "dict")
            .output("model", "dict")
            .parameter("lr", Some(json!(0.01)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_outputs_feed_downstream_steps() {
        let mut graph = StepInvocationGraph::new("training");
        let _guard = activation::enter("training", graph.pass_id()).unwrap();
        let mut ctx = PipelineContext::new(&mut graph);

        let data = ctx.call(&loader()).invoke().unwrap().get("data").unwrap();
        let model = ctx
            .call(&trainer())
            .input("data", data)
            .parameter("lr", json!(0.1))
            .invoke()
            .unwrap();

        assert_eq!(model.invocation_id(), "trainer");
        assert_eq!(ctx.invocation_count(), 2);
        let invocation = graph.get("trainer").unwrap();
        assert!(invocation.upstream_steps.contains("loader"));
        assert_eq!(invocation.parameters["lr"], json!(0.1));
    }

    #[test]
    fn test_external_input() {
        let mut graph = StepInvocationGraph::new("training");
        let _guard = activation::enter("training", graph.pass_id()).unwrap();
        let mut ctx = PipelineContext::new(&mut graph);

        ctx.call(&trainer())
            .external("data", ExternalArtifact::from_value(json!({"rows": 3})))
            .invoke()
            .unwrap();

        assert!(graph.get("trainer").unwrap().upstream_steps.is_empty());
    }

    #[test]
    fn test_invalid_calls() {
        let mut graph = StepInvocationGraph::new("training");
        let _guard = activation::enter("training", graph.pass_id()).unwrap();
        let mut ctx = PipelineContext::new(&mut graph);

        let missing = ctx.call(&trainer()).invoke().unwrap_err();
        assert!(missing.to_string().contains("missing input 'data'"));

        let unknown = ctx
            .call(&trainer())
            .external("data", ExternalArtifact::from_value(json!(1)))
            .external("labels", ExternalArtifact::from_value(json!(1)))
            .invoke()
            .unwrap_err();
        assert!(unknown.to_string().contains("labels"));

        let parameter = ctx
            .call(&trainer())
            .external("data", ExternalArtifact::from_value(json!(1)))
            .parameter("epochs", json!(3))
            .invoke()
            .unwrap_err();
        assert!(parameter.to_string().contains("epochs"));
        assert!(parameter.is_user_error());

        assert_eq!(ctx.invocation_count(), 0);
    }
}
