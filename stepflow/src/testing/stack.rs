use crate::compiler::PipelineDeployment;
use crate::errors::StackError;
use crate::stack::{BuildConfiguration, Stack};
use crate::store::DeploymentResponse;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// A stack that records the deployments it is asked to prepare and deploy.
#[derive(Debug)]
pub struct RecordingStack {
    id: Uuid,
    name: String,
    setting_keys: BTreeSet<String>,
    build_keys: Vec<String>,
    fail_deploy: bool,
    prepared: Mutex<Vec<Uuid>>,
    deployed: Mutex<Vec<Uuid>>,
}

impl Default for RecordingStack {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingStack {
    /// Creates a stack with a local orchestrator and artifact store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "recording".to_string(),
            setting_keys: ["orchestrator.local", "artifact_store.local"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            build_keys: Vec::new(),
            fail_deploy: false,
            prepared: Mutex::new(Vec::new()),
            deployed: Mutex::new(Vec::new()),
        }
    }

    /// Sets the stack name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Accepts settings for another `<component_type>.<flavor>` key.
    #[must_use]
    pub fn with_setting_key(mut self, key: impl Into<String>) -> Self {
        self.setting_keys.insert(key.into());
        self
    }

    /// Requires a pipeline-wide build under `key`.
    ///
    /// The build settings are the pipeline's `docker` settings.
    #[must_use]
    pub fn with_build_requirement(mut self, key: impl Into<String>) -> Self {
        self.build_keys.push(key.into());
        self
    }

    /// Makes every deployment fail.
    #[must_use]
    pub const fn failing_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    /// Ids of prepared deployments, in call order.
    #[must_use]
    pub fn prepared(&self) -> Vec<Uuid> {
        self.prepared.lock().clone()
    }

    /// Ids of deployments passed to `deploy_pipeline`, in call order.
    #[must_use]
    pub fn deployed(&self) -> Vec<Uuid> {
        self.deployed.lock().clone()
    }
}

#[async_trait]
impl Stack for RecordingStack {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn setting_keys(&self) -> BTreeSet<String> {
        self.setting_keys.clone()
    }

    fn build_requirements(&self, deployment: &PipelineDeployment) -> Vec<BuildConfiguration> {
        let docker = deployment
            .pipeline_configuration()
            .settings
            .get("docker")
            .cloned()
            .unwrap_or(Value::Null);
        self.build_keys
            .iter()
            .map(|key| BuildConfiguration::pipeline(key.clone(), docker.clone()))
            .collect()
    }

    async fn prepare_pipeline_deployment(
        &self,
        deployment: &DeploymentResponse,
    ) -> Result<(), StackError> {
        self.prepared.lock().push(deployment.id);
        Ok(())
    }

    async fn deploy_pipeline(&self, deployment: &DeploymentResponse) -> Result<(), StackError> {
        self.deployed.lock().push(deployment.id);
        if self.fail_deploy {
            return Err(StackError::Deployment {
                stack: self.name.clone(),
                pipeline: deployment.body.pipeline_configuration.name.clone(),
                reason: "orchestrator rejected the deployment".to_string(),
            });
        }
        Ok(())
    }
}
