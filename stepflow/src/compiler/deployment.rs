//! The immutable deployment produced by the compiler.

use super::StepSpec;
use crate::config::{ConfigMap, PipelineConfiguration, Schedule, StepConfiguration};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step of a deployment: its structure plus its resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// Structural description.
    pub spec: StepSpec,
    /// Fully resolved configuration.
    pub config: StepConfiguration,
}

/// Fully resolved runtime descriptor of one pipeline run.
///
/// Fields are only readable; any change requires compiling again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDeployment {
    run_name_template: String,
    pipeline_configuration: PipelineConfiguration,
    steps: Vec<DeploymentStep>,
    parameters: ConfigMap,
    stack_id: Uuid,
    schedule: Option<Schedule>,
    build: Option<Uuid>,
    client_version: String,
}

impl PipelineDeployment {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_name_template: String,
        pipeline_configuration: PipelineConfiguration,
        steps: Vec<DeploymentStep>,
        parameters: ConfigMap,
        stack_id: Uuid,
        schedule: Option<Schedule>,
        build: Option<Uuid>,
    ) -> Self {
        Self {
            run_name_template,
            pipeline_configuration,
            steps,
            parameters,
            stack_id,
            schedule,
            build,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Returns the run name template.
    #[must_use]
    pub fn run_name_template(&self) -> &str {
        &self.run_name_template
    }

    /// Returns the merged pipeline configuration.
    #[must_use]
    pub fn pipeline_configuration(&self) -> &PipelineConfiguration {
        &self.pipeline_configuration
    }

    /// Returns the steps in invocation order.
    #[must_use]
    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    /// Returns the step with the given invocation id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|step| step.config.name == id)
    }

    /// Returns the entrypoint arguments.
    #[must_use]
    pub fn parameters(&self) -> &ConfigMap {
        &self.parameters
    }

    /// Returns the id of the target stack.
    #[must_use]
    pub const fn stack_id(&self) -> Uuid {
        self.stack_id
    }

    /// Returns the schedule, if the run is scheduled.
    #[must_use]
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// Returns the build requested by the run configuration.
    #[must_use]
    pub const fn build(&self) -> Option<Uuid> {
        self.build
    }

    /// Returns the version of the library that compiled the deployment.
    #[must_use]
    pub fn client_version(&self) -> &str {
        &self.client_version
    }
}
