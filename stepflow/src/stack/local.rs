use super::{BuildConfiguration, Stack};
use crate::compiler::PipelineDeployment;
use crate::errors::StackError;
use crate::store::{DeploymentResponse, StackModel};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

/// A stack that runs deployments in the current process.
///
/// It needs no builds and accepts settings for the flavors of its components.
#[derive(Debug, Clone)]
pub struct LocalStack {
    model: StackModel,
}

impl LocalStack {
    /// Creates a stack from its stored model.
    #[must_use]
    pub const fn new(model: StackModel) -> Self {
        Self { model }
    }

    /// Returns the stored model.
    #[must_use]
    pub const fn model(&self) -> &StackModel {
        &self.model
    }
}

#[async_trait]
impl Stack for LocalStack {
    fn id(&self) -> Uuid {
        self.model.id
    }

    fn name(&self) -> String {
        self.model.name.clone()
    }

    fn setting_keys(&self) -> BTreeSet<String> {
        self.model
            .components
            .values()
            .map(|component| format!("{}.{}", component.component_type, component.flavor))
            .collect()
    }

    fn build_requirements(&self, _deployment: &PipelineDeployment) -> Vec<BuildConfiguration> {
        Vec::new()
    }

    async fn prepare_pipeline_deployment(
        &self,
        _deployment: &DeploymentResponse,
    ) -> Result<(), StackError> {
        Ok(())
    }

    async fn deploy_pipeline(&self, deployment: &DeploymentResponse) -> Result<(), StackError> {
        info!(
            stack = %self.model.name,
            deployment_id = %deployment.id,
            steps = deployment.body.steps.len(),
            "Dispatched deployment to local stack"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, MetadataStore};

    #[tokio::test]
    async fn test_setting_keys_from_components() {
        let store = InMemoryStore::default();
        let stack = LocalStack::new(store.get_or_create_default_stack().await.unwrap());

        let keys = stack.setting_keys();
        assert!(keys.contains("orchestrator.local"));
        assert!(keys.contains("artifact_store.local"));
        assert_eq!(stack.name(), "default");
    }
}
