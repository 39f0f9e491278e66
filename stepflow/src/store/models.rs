//! Request and response models exchanged with the metadata store.

use crate::compiler::{DeploymentStep, PipelineDeployment, PipelineSpec};
use crate::config::{PipelineConfiguration, Schedule};
use crate::stack::BuildConfiguration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Version of pipelines registered without a version number.
pub const UNVERSIONED: &str = "UNVERSIONED";

/// A user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserModel {
    /// User id.
    pub id: Uuid,
    /// User name.
    pub name: String,
    /// SHA-256 hex digest of the password, if one is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// A workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceModel {
    /// Workspace id.
    pub id: Uuid,
    /// Workspace name.
    pub name: String,
}

/// A stack component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentModel {
    /// Component id.
    pub id: Uuid,
    /// Component name.
    pub name: String,
    /// Component type, such as `orchestrator`.
    pub component_type: String,
    /// Flavor, such as `local`.
    pub flavor: String,
}

/// A registered stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackModel {
    /// Stack id.
    pub id: Uuid,
    /// Stack name.
    pub name: String,
    /// Owning workspace.
    pub workspace: Uuid,
    /// Components keyed by component type.
    pub components: BTreeMap<String, ComponentModel>,
}

impl StackModel {
    /// Returns the component of the given type.
    #[must_use]
    pub fn component(&self, component_type: &str) -> Option<&ComponentModel> {
        self.components.get(component_type)
    }
}

/// Request to register a pipeline version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Pipeline name.
    pub name: String,
    /// Version number, or [`UNVERSIONED`].
    pub version: String,
    /// Version hash of the compiled spec and sources.
    pub version_hash: String,
    /// The structural spec.
    pub spec: PipelineSpec,
    /// Pipeline documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Registering user.
    pub user: Uuid,
    /// Owning workspace.
    pub workspace: Uuid,
}

/// A registered pipeline version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// Record id.
    pub id: Uuid,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// The registered data.
    #[serde(flatten)]
    pub body: PipelineRequest,
}

impl PipelineResponse {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.body.name
    }

    /// Returns the version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.body.version
    }

    /// Returns the version hash.
    #[must_use]
    pub fn version_hash(&self) -> &str {
        &self.body.version_hash
    }
}

/// Request to register a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Schedule name.
    pub name: String,
    /// Scheduled pipeline, if registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<Uuid>,
    /// Stack that runs the schedule.
    pub stack_id: Uuid,
    /// Whether the schedule is active.
    pub active: bool,
    /// Timing.
    pub schedule: Schedule,
    /// Owning user.
    pub user: Uuid,
    /// Owning workspace.
    pub workspace: Uuid,
}

/// A registered schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    /// Record id.
    pub id: Uuid,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// The registered data.
    #[serde(flatten)]
    pub body: ScheduleRequest,
}

/// Request to register a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Stack the build was made for.
    pub stack_id: Uuid,
    /// Pipeline the build was made for, if registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<Uuid>,
    /// Checksum of the build configurations.
    pub checksum: String,
    /// The images that make up the build.
    pub configurations: Vec<BuildConfiguration>,
    /// Whether the images download code from a repository at runtime.
    pub downloads_code: bool,
    /// Owning user.
    pub user: Uuid,
    /// Owning workspace.
    pub workspace: Uuid,
}

/// A registered build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResponse {
    /// Record id.
    pub id: Uuid,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// The registered data.
    #[serde(flatten)]
    pub body: BuildRequest,
}

/// Source control state a run was started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReference {
    /// Commit hash.
    pub commit: String,
    /// Path of the source root relative to the repository root.
    pub subdirectory: String,
    /// Id of the code repository.
    pub code_repository_id: Uuid,
}

/// Request to register a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Run name template.
    pub run_name_template: String,
    /// Merged pipeline configuration.
    pub pipeline_configuration: PipelineConfiguration,
    /// Steps in invocation order.
    pub steps: Vec<DeploymentStep>,
    /// Stack the deployment runs on.
    pub stack_id: Uuid,
    /// Registered pipeline, unless the run is unlisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<Uuid>,
    /// Build used to run the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<Uuid>,
    /// Schedule that triggers the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
    /// Source control state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_reference: Option<CodeReference>,
    /// Cache key of every step, keyed by invocation id.
    pub step_cache_keys: BTreeMap<String, String>,
    /// Library version that compiled the deployment.
    pub client_version: String,
    /// Owning user.
    pub user: Uuid,
    /// Owning workspace.
    pub workspace: Uuid,
}

impl DeploymentRequest {
    /// Creates a request from a compiled deployment.
    #[must_use]
    pub fn from_deployment(deployment: &PipelineDeployment, user: Uuid, workspace: Uuid) -> Self {
        Self {
            run_name_template: deployment.run_name_template().to_string(),
            pipeline_configuration: deployment.pipeline_configuration().clone(),
            steps: deployment.steps().to_vec(),
            stack_id: deployment.stack_id(),
            pipeline_id: None,
            build_id: None,
            schedule_id: None,
            code_reference: None,
            step_cache_keys: BTreeMap::new(),
            client_version: deployment.client_version().to_string(),
            user,
            workspace,
        }
    }
}

/// A registered deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResponse {
    /// Record id.
    pub id: Uuid,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// The registered data.
    #[serde(flatten)]
    pub body: DeploymentRequest,
}

/// Filter for listing pipelines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineFilter {
    /// Only pipelines with this name.
    pub name: Option<String>,
    /// Only pipelines with this version hash.
    pub version_hash: Option<String>,
    /// Maximum number of items; `None` returns all.
    pub size: Option<usize>,
}

impl PipelineFilter {
    /// Filters by name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Filters by version hash.
    #[must_use]
    pub fn with_version_hash(mut self, version_hash: impl Into<String>) -> Self {
        self.version_hash = Some(version_hash.into());
        self
    }

    /// Limits the page size.
    #[must_use]
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }
}

/// Filter for listing builds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFilter {
    /// Only builds for this stack.
    pub stack_id: Option<Uuid>,
    /// Only builds with this checksum.
    pub checksum: Option<String>,
}

/// One page of results, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total number of matching items.
    pub total: usize,
}

impl<T> Page<T> {
    /// Returns the first item.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Consumes the page and returns the first item.
    #[must_use]
    pub fn into_first(self) -> Option<T> {
        self.items.into_iter().next()
    }
}
