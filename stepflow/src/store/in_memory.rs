//! In-memory metadata store.

use super::{
    BuildFilter, BuildRequest, BuildResponse, ComponentModel, DeploymentRequest,
    DeploymentResponse, MetadataStore, Page, PipelineFilter, PipelineRequest, PipelineResponse,
    ScheduleRequest, ScheduleResponse, StackModel, UserModel, WorkspaceModel,
};
use crate::config::EnvironmentConfig;
use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;
use uuid::Uuid;

const DEFAULT_STACK_NAME: &str = "default";

/// Number of calls made to the store, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    /// `list_pipelines` calls.
    pub list_pipelines: usize,
    /// `create_pipeline` calls.
    pub create_pipeline: usize,
    /// `create_schedule` calls.
    pub create_schedule: usize,
    /// `create_build` calls.
    pub create_build: usize,
    /// `create_deployment` calls.
    pub create_deployment: usize,
}

#[derive(Debug, Default)]
struct Counters {
    list_pipelines: AtomicUsize,
    create_pipeline: AtomicUsize,
    create_schedule: AtomicUsize,
    create_build: AtomicUsize,
    create_deployment: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> StoreCallCounts {
        StoreCallCounts {
            list_pipelines: self.list_pipelines.load(Ordering::SeqCst),
            create_pipeline: self.create_pipeline.load(Ordering::SeqCst),
            create_schedule: self.create_schedule.load(Ordering::SeqCst),
            create_build: self.create_build.load(Ordering::SeqCst),
            create_deployment: self.create_deployment.load(Ordering::SeqCst),
        }
    }
}

/// Metadata store kept in process memory.
///
/// Bootstraps a default user, workspace and stack from the environment
/// configuration.
#[derive(Debug)]
pub struct InMemoryStore {
    user: UserModel,
    workspace: WorkspaceModel,
    pipelines: RwLock<Vec<PipelineResponse>>,
    schedules: RwLock<Vec<ScheduleResponse>>,
    builds: RwLock<Vec<BuildResponse>>,
    deployments: RwLock<Vec<DeploymentResponse>>,
    stacks: DashMap<Uuid, StackModel>,
    default_stack_id: Mutex<Option<Uuid>>,
    counters: Counters,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(&EnvironmentConfig::default())
    }
}

impl InMemoryStore {
    /// Creates a store and bootstraps the default entities.
    #[must_use]
    pub fn new(environment: &EnvironmentConfig) -> Self {
        let password_hash = environment.default_user_password.as_ref().map(|password| {
            let mut hasher = Sha256::new();
            hasher.update(password.as_bytes());
            hex::encode(hasher.finalize())
        });

        let store = Self {
            user: UserModel {
                id: Uuid::new_v4(),
                name: environment.default_user_name.clone(),
                password_hash,
            },
            workspace: WorkspaceModel {
                id: Uuid::new_v4(),
                name: environment.default_workspace_name.clone(),
            },
            pipelines: RwLock::new(Vec::new()),
            schedules: RwLock::new(Vec::new()),
            builds: RwLock::new(Vec::new()),
            deployments: RwLock::new(Vec::new()),
            stacks: DashMap::new(),
            default_stack_id: Mutex::new(None),
            counters: Counters::default(),
        };
        store.default_stack();
        store
    }

    /// Returns the call counts so far.
    #[must_use]
    pub fn calls(&self) -> StoreCallCounts {
        self.counters.snapshot()
    }

    /// Returns all registered pipeline versions in creation order.
    #[must_use]
    pub fn pipelines(&self) -> Vec<PipelineResponse> {
        self.pipelines.read().clone()
    }

    /// Returns all registered schedules in creation order.
    #[must_use]
    pub fn schedules(&self) -> Vec<ScheduleResponse> {
        self.schedules.read().clone()
    }

    /// Returns all registered builds in creation order.
    #[must_use]
    pub fn builds(&self) -> Vec<BuildResponse> {
        self.builds.read().clone()
    }

    /// Returns all registered deployments in creation order.
    #[must_use]
    pub fn deployments(&self) -> Vec<DeploymentResponse> {
        self.deployments.read().clone()
    }

    /// Registers a stack.
    pub fn register_stack(&self, stack: StackModel) {
        self.stacks.insert(stack.id, stack);
    }

    /// Removes a stack.
    pub fn delete_stack(&self, id: Uuid) -> Option<StackModel> {
        self.stacks.remove(&id).map(|(_, stack)| stack)
    }

    fn default_stack(&self) -> StackModel {
        let mut default_id = self.default_stack_id.lock();
        if let Some(stack) = default_id.and_then(|id| self.stacks.get(&id).map(|s| s.clone())) {
            return stack;
        }

        let stack = self.create_default_stack();
        if default_id.is_some() {
            info!(stack_id = %stack.id, "Regenerated missing default stack");
        }
        *default_id = Some(stack.id);
        self.stacks.insert(stack.id, stack.clone());
        stack
    }

    fn create_default_stack(&self) -> StackModel {
        let components = ["orchestrator", "artifact_store"]
            .into_iter()
            .map(|component_type| {
                (
                    component_type.to_string(),
                    ComponentModel {
                        id: Uuid::new_v4(),
                        name: DEFAULT_STACK_NAME.to_string(),
                        component_type: component_type.to_string(),
                        flavor: "local".to_string(),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        StackModel {
            id: Uuid::new_v4(),
            name: DEFAULT_STACK_NAME.to_string(),
            workspace: self.workspace.id,
            components,
        }
    }
}

fn page<T>(items: Vec<T>, size: Option<usize>) -> Page<T> {
    let total = items.len();
    let items = match size {
        Some(size) => items.into_iter().take(size).collect(),
        None => items,
    };
    Page { items, total }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn list_pipelines(&self, filter: &PipelineFilter) -> Result<Page<PipelineResponse>, StoreError> {
        Counters::bump(&self.counters.list_pipelines);
        let items: Vec<PipelineResponse> = self
            .pipelines
            .read()
            .iter()
            .rev()
            .filter(|pipeline| filter.name.as_deref().map_or(true, |name| pipeline.name() == name))
            .filter(|pipeline| {
                filter
                    .version_hash
                    .as_deref()
                    .map_or(true, |hash| pipeline.version_hash() == hash)
            })
            .cloned()
            .collect();
        Ok(page(items, filter.size))
    }

    async fn create_pipeline(&self, request: PipelineRequest) -> Result<PipelineResponse, StoreError> {
        Counters::bump(&self.counters.create_pipeline);
        let mut pipelines = self.pipelines.write();
        if pipelines
            .iter()
            .any(|p| p.name() == request.name && p.version() == request.version)
        {
            return Err(StoreError::conflict(
                "Pipeline",
                format!("{}:{}", request.name, request.version),
            ));
        }

        let response = PipelineResponse {
            id: Uuid::new_v4(),
            created: Utc::now(),
            body: request,
        };
        pipelines.push(response.clone());
        Ok(response)
    }

    async fn create_schedule(&self, request: ScheduleRequest) -> Result<ScheduleResponse, StoreError> {
        Counters::bump(&self.counters.create_schedule);
        let response = ScheduleResponse {
            id: Uuid::new_v4(),
            created: Utc::now(),
            body: request,
        };
        self.schedules.write().push(response.clone());
        Ok(response)
    }

    async fn list_builds(&self, filter: &BuildFilter) -> Result<Page<BuildResponse>, StoreError> {
        let items: Vec<BuildResponse> = self
            .builds
            .read()
            .iter()
            .rev()
            .filter(|build| filter.stack_id.map_or(true, |id| build.body.stack_id == id))
            .filter(|build| {
                filter
                    .checksum
                    .as_deref()
                    .map_or(true, |checksum| build.body.checksum == checksum)
            })
            .cloned()
            .collect();
        Ok(page(items, None))
    }

    async fn get_build(&self, id: Uuid) -> Result<BuildResponse, StoreError> {
        self.builds
            .read()
            .iter()
            .find(|build| build.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Build", id.to_string()))
    }

    async fn create_build(&self, request: BuildRequest) -> Result<BuildResponse, StoreError> {
        Counters::bump(&self.counters.create_build);
        let response = BuildResponse {
            id: Uuid::new_v4(),
            created: Utc::now(),
            body: request,
        };
        self.builds.write().push(response.clone());
        Ok(response)
    }

    async fn create_deployment(&self, request: DeploymentRequest) -> Result<DeploymentResponse, StoreError> {
        Counters::bump(&self.counters.create_deployment);
        let response = DeploymentResponse {
            id: Uuid::new_v4(),
            created: Utc::now(),
            body: request,
        };
        self.deployments.write().push(response.clone());
        Ok(response)
    }

    async fn active_user(&self) -> Result<UserModel, StoreError> {
        Ok(self.user.clone())
    }

    async fn active_workspace(&self) -> Result<WorkspaceModel, StoreError> {
        Ok(self.workspace.clone())
    }

    async fn get_stack(&self, id: Uuid) -> Result<StackModel, StoreError> {
        self.stacks
            .get(&id)
            .map(|stack| stack.clone())
            .ok_or_else(|| StoreError::not_found("Stack", id.to_string()))
    }

    async fn get_or_create_default_stack(&self) -> Result<StackModel, StoreError> {
        Ok(self.default_stack())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{PipelineSpec, SPEC_VERSION};
    use crate::config::ConfigMap;
    use crate::store::{validate_active_stack, UNVERSIONED};

    fn request(store: &InMemoryStore, version: &str, hash: &str) -> PipelineRequest {
        PipelineRequest {
            name: "training".to_string(),
            version: version.to_string(),
            version_hash: hash.to_string(),
            spec: PipelineSpec {
                version: SPEC_VERSION.to_string(),
                source: None,
                parameters: ConfigMap::new(),
                steps: Vec::new(),
            },
            docstring: None,
            user: store.user.id,
            workspace: store.workspace.id,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_from_environment() {
        let environment = EnvironmentConfig {
            default_user_name: "admin".to_string(),
            default_workspace_name: "research".to_string(),
            default_user_password: Some("secret".to_string()),
            ..EnvironmentConfig::default()
        };
        let store = InMemoryStore::new(&environment);

        let user = store.active_user().await.unwrap();
        assert_eq!(user.name, "admin");
        assert_eq!(user.password_hash.as_deref().map(str::len), Some(64));
        assert_eq!(store.active_workspace().await.unwrap().name, "research");

        let stack = store.get_or_create_default_stack().await.unwrap();
        assert_eq!(stack.name, "default");
        assert_eq!(stack.component("orchestrator").unwrap().flavor, "local");
    }

    #[tokio::test]
    async fn test_create_pipeline_conflict() {
        let store = InMemoryStore::default();
        store.create_pipeline(request(&store, "1", "a")).await.unwrap();

        let err = store.create_pipeline(request(&store, "1", "b")).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(store.create_pipeline(request(&store, UNVERSIONED, "b")).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_pipelines_newest_first() {
        let store = InMemoryStore::default();
        store.create_pipeline(request(&store, "1", "a")).await.unwrap();
        store.create_pipeline(request(&store, "2", "b")).await.unwrap();

        let all = store.list_pipelines(&PipelineFilter::named("training").with_size(1)).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.first().unwrap().version(), "2");

        let by_hash = store
            .list_pipelines(&PipelineFilter::named("training").with_version_hash("a"))
            .await
            .unwrap();
        assert_eq!(by_hash.into_first().unwrap().version(), "1");
        assert_eq!(store.calls().list_pipelines, 2);
    }

    #[tokio::test]
    async fn test_default_stack_self_heals() {
        let store = InMemoryStore::default();
        let original = store.get_or_create_default_stack().await.unwrap();
        assert_eq!(store.get_or_create_default_stack().await.unwrap(), original);

        store.delete_stack(original.id);
        let regenerated = store.get_or_create_default_stack().await.unwrap();
        assert_ne!(regenerated.id, original.id);
        assert_eq!(regenerated.name, "default");
    }

    #[tokio::test]
    async fn test_validate_active_stack_falls_back() {
        let store = InMemoryStore::default();
        let fallback = validate_active_stack(&store, Some(Uuid::new_v4())).await.unwrap();
        assert_eq!(fallback.name, "default");

        let custom = StackModel {
            id: Uuid::new_v4(),
            name: "gpu".to_string(),
            workspace: store.workspace.id,
            components: BTreeMap::new(),
        };
        store.register_stack(custom.clone());
        assert_eq!(validate_active_stack(&store, Some(custom.id)).await.unwrap(), custom);
    }
}
