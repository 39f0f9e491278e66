//! The metadata store collaborator.
//!
//! The engine reads and writes pipelines, schedules, builds and deployments
//! through [`MetadataStore`]. The store's uniqueness constraints are the only
//! synchronization between concurrent registrants.

mod in_memory;
mod models;

pub use in_memory::{InMemoryStore, StoreCallCounts};
pub use models::{
    BuildFilter, BuildRequest, BuildResponse, CodeReference, ComponentModel, DeploymentRequest,
    DeploymentResponse, Page, PipelineFilter, PipelineRequest, PipelineResponse, ScheduleRequest,
    ScheduleResponse, StackModel, UserModel, WorkspaceModel, UNVERSIONED,
};

use crate::errors::StoreError;
use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

/// Persistence operations used by the coordinator.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Lists pipeline versions, newest first.
    async fn list_pipelines(&self, filter: &PipelineFilter) -> Result<Page<PipelineResponse>, StoreError>;

    /// Registers a pipeline version.
    ///
    /// Fails with a conflict if `(name, version)` already exists.
    async fn create_pipeline(&self, request: PipelineRequest) -> Result<PipelineResponse, StoreError>;

    /// Registers a schedule.
    async fn create_schedule(&self, request: ScheduleRequest) -> Result<ScheduleResponse, StoreError>;

    /// Lists builds, newest first.
    async fn list_builds(&self, filter: &BuildFilter) -> Result<Page<BuildResponse>, StoreError>;

    /// Returns a build by id.
    async fn get_build(&self, id: Uuid) -> Result<BuildResponse, StoreError>;

    /// Registers a build.
    async fn create_build(&self, request: BuildRequest) -> Result<BuildResponse, StoreError>;

    /// Registers a deployment.
    async fn create_deployment(&self, request: DeploymentRequest) -> Result<DeploymentResponse, StoreError>;

    /// Returns the active user.
    async fn active_user(&self) -> Result<UserModel, StoreError>;

    /// Returns the active workspace.
    async fn active_workspace(&self) -> Result<WorkspaceModel, StoreError>;

    /// Returns a stack by id.
    async fn get_stack(&self, id: Uuid) -> Result<StackModel, StoreError>;

    /// Returns the default stack of the active workspace, creating it if it
    /// does not exist.
    async fn get_or_create_default_stack(&self) -> Result<StackModel, StoreError>;
}

/// Returns the stack with `stack_id`, falling back to the default stack.
///
/// A missing stack is not an error: the default stack is regenerated and
/// returned instead.
///
/// # Errors
///
/// Returns backend errors other than `NotFound`.
pub async fn validate_active_stack(
    store: &dyn MetadataStore,
    stack_id: Option<Uuid>,
) -> Result<StackModel, StoreError> {
    let Some(stack_id) = stack_id else {
        return store.get_or_create_default_stack().await;
    };

    match store.get_stack(stack_id).await {
        Ok(stack) => Ok(stack),
        Err(StoreError::NotFound { .. }) => {
            warn!(
                stack_id = %stack_id,
                "Active stack not found, falling back to the default stack"
            );
            store.get_or_create_default_stack().await
        }
        Err(err) => Err(err),
    }
}
