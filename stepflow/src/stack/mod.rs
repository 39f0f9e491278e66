//! Execution stacks.
//!
//! A stack bundles the infrastructure a pipeline runs on. The engine only
//! asks a stack which settings it accepts, which builds a deployment needs,
//! and to validate and execute deployments.

mod local;

pub use local::LocalStack;

use crate::compiler::PipelineDeployment;
use crate::errors::StackError;
use crate::store::DeploymentResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Build key used for images that run the whole pipeline.
pub const ORCHESTRATOR_BUILD_KEY: &str = "orchestrator";

/// One image a stack needs before it can run a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Component that requires the image.
    pub key: String,
    /// Invocation id for step-specific images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Docker settings used for the image.
    pub settings: Value,
}

impl BuildConfiguration {
    /// Creates a pipeline-wide build configuration.
    #[must_use]
    pub fn pipeline(key: impl Into<String>, settings: Value) -> Self {
        Self {
            key: key.into(),
            step_name: None,
            settings,
        }
    }

    /// Creates a build configuration for one step.
    #[must_use]
    pub fn for_step(key: impl Into<String>, step_name: impl Into<String>, settings: Value) -> Self {
        Self {
            key: key.into(),
            step_name: Some(step_name.into()),
            settings,
        }
    }
}

/// An execution stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Stack: Send + Sync {
    /// Returns the stack id.
    fn id(&self) -> Uuid;

    /// Returns the stack name.
    fn name(&self) -> String;

    /// Returns the `<component_type>.<flavor>` settings keys this stack accepts.
    fn setting_keys(&self) -> BTreeSet<String>;

    /// Returns the builds required to run `deployment`.
    ///
    /// An empty list means the stack runs the deployment without a build.
    fn build_requirements(&self, deployment: &PipelineDeployment) -> Vec<BuildConfiguration>;

    /// Validates a deployment before it is dispatched.
    async fn prepare_pipeline_deployment(
        &self,
        deployment: &DeploymentResponse,
    ) -> Result<(), StackError>;

    /// Runs or schedules a deployment.
    async fn deploy_pipeline(&self, deployment: &DeploymentResponse) -> Result<(), StackError>;
}
