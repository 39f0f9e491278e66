//! The step invocation graph of one preparation pass.

use super::activation;
use crate::errors::GraphError;
use crate::steps::{NewInvocation, StepInvocation};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Highest numeric suffix tried when an invocation id is already taken.
pub const MAX_ID_SUFFIX: usize = 10_000;

/// Invocations of one pipeline preparation pass.
///
/// Invocations are kept in insertion order. An invocation can only depend on
/// invocations added before it, so insertion order is a topological order.
#[derive(Debug, Clone)]
pub struct StepInvocationGraph {
    pipeline_name: String,
    pass_id: Uuid,
    detached: bool,
    invocations: Vec<StepInvocation>,
    index: HashMap<String, usize>,
}

impl StepInvocationGraph {
    /// Creates a graph for a new preparation pass.
    ///
    /// Invocations can only be added while the pass is active on the current
    /// thread.
    #[must_use]
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            pass_id: Uuid::new_v4(),
            detached: false,
            invocations: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Creates a graph for a nested pipeline call.
    ///
    /// Detached graphs accept invocations without being active and are
    /// discarded once the nested entrypoint returns.
    #[must_use]
    pub fn detached(pipeline_name: impl Into<String>) -> Self {
        Self {
            detached: true,
            ..Self::new(pipeline_name)
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Returns the id of the preparation pass.
    #[must_use]
    pub const fn pass_id(&self) -> Uuid {
        self.pass_id
    }

    /// Returns true for graphs built by nested pipeline calls.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.detached
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    /// Returns true if no step has been invoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    /// Returns true if an invocation with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the invocation with this id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StepInvocation> {
        self.index.get(id).map(|&position| &self.invocations[position])
    }

    /// Iterates over invocations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &StepInvocation> {
        self.invocations.iter()
    }

    /// Returns invocation ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.invocations.iter().map(|invocation| invocation.id.as_str()).collect()
    }

    /// Adds a step invocation and returns its id.
    ///
    /// Upstream steps are the explicit `upstream_steps` of the request plus the
    /// producers of all input artifacts.
    ///
    /// # Errors
    ///
    /// - `InactivePipeline` if this pass is not the active one.
    /// - `CrossPipelineReference` if an input was produced in another pass.
    /// - `UnknownUpstreamStep` if an upstream id does not exist.
    /// - `DuplicateInvocation` if the id is taken and suffixes are disallowed.
    /// - `IdentifierExhaustion` if no free suffix exists.
    pub fn add_step_invocation(&mut self, request: NewInvocation) -> Result<String, GraphError> {
        if !self.detached && !activation::is_active(self.pass_id) {
            return Err(GraphError::InactivePipeline {
                pipeline: self.pipeline_name.clone(),
            });
        }

        for (input, artifact) in &request.input_artifacts {
            if artifact.pass_id != self.pass_id {
                return Err(GraphError::CrossPipelineReference {
                    pipeline: self.pipeline_name.clone(),
                    step: request.base_id().to_string(),
                    input: input.clone(),
                    producer_pipeline: artifact.pipeline_name.clone(),
                });
            }
        }

        let mut upstream_steps = request.upstream_steps.clone();
        upstream_steps.extend(
            request
                .input_artifacts
                .values()
                .map(|artifact| artifact.invocation_id.clone()),
        );
        if let Some(unknown) = upstream_steps.iter().find(|id| !self.contains(id)) {
            return Err(GraphError::UnknownUpstreamStep {
                pipeline: self.pipeline_name.clone(),
                step: request.base_id().to_string(),
                upstream: unknown.clone(),
            });
        }

        let id = self.compute_invocation_id(request.base_id(), request.allow_id_suffix)?;
        debug!(
            pipeline = %self.pipeline_name,
            step = request.step.name(),
            invocation_id = %id,
            upstream = upstream_steps.len(),
            "Added step invocation"
        );

        self.index.insert(id.clone(), self.invocations.len());
        self.invocations.push(StepInvocation {
            id: id.clone(),
            step: request.step,
            input_artifacts: request.input_artifacts,
            external_artifacts: request.external_artifacts,
            parameters: request.parameters,
            upstream_steps,
            configuration: request.configuration,
        });
        Ok(id)
    }

    fn compute_invocation_id(&self, base: &str, allow_suffix: bool) -> Result<String, GraphError> {
        if !self.contains(base) {
            return Ok(base.to_string());
        }
        if !allow_suffix {
            return Err(GraphError::DuplicateInvocation {
                pipeline: self.pipeline_name.clone(),
                id: base.to_string(),
            });
        }

        (2..MAX_ID_SUFFIX)
            .map(|suffix| format!("{base}_{suffix}"))
            .find(|candidate| !self.contains(candidate))
            .ok_or_else(|| GraphError::IdentifierExhaustion {
                pipeline: self.pipeline_name.clone(),
                base: base.to_string(),
            })
    }
}
