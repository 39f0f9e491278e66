//! Registration when another process registers the same pipeline concurrently.

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use stepflow::config::EnvironmentConfig;
use stepflow::coordinator::{Coordinator, ExecutionGuard};
use stepflow::errors::StoreError;
use stepflow::store::{
    BuildFilter, BuildRequest, BuildResponse, DeploymentRequest, DeploymentResponse,
    InMemoryStore, MetadataStore, Page, PipelineFilter, PipelineRequest, PipelineResponse,
    ScheduleRequest, ScheduleResponse, StackModel, UserModel, WorkspaceModel,
};
use stepflow::testing::{fixtures, RecordingStack};
use uuid::Uuid;

/// How the competing registrant changes the request it wins the race with.
#[derive(Clone, Copy)]
enum Competitor {
    SameHash,
    OtherHash,
}

/// Store where a competitor registers first whenever a pipeline is created.
struct RacingStore {
    inner: InMemoryStore,
    competitor: Competitor,
    races_left: Mutex<usize>,
    winners: Mutex<Vec<Uuid>>,
}

impl RacingStore {
    fn new(competitor: Competitor, races: usize) -> Self {
        Self {
            inner: InMemoryStore::default(),
            competitor,
            races_left: Mutex::new(races),
            winners: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MetadataStore for RacingStore {
    async fn list_pipelines(&self, filter: &PipelineFilter) -> Result<Page<PipelineResponse>, StoreError> {
        self.inner.list_pipelines(filter).await
    }

    async fn create_pipeline(&self, request: PipelineRequest) -> Result<PipelineResponse, StoreError> {
        let race = {
            let mut left = self.races_left.lock();
            let race = *left > 0;
            *left = left.saturating_sub(1);
            race
        };
        if race {
            let mut competing = request.clone();
            if matches!(self.competitor, Competitor::OtherHash) {
                competing.version_hash = format!("other-{}", competing.version);
            }
            let winner = self.inner.create_pipeline(competing).await?;
            self.winners.lock().push(winner.id);
        }
        self.inner.create_pipeline(request).await
    }

    async fn create_schedule(&self, request: ScheduleRequest) -> Result<ScheduleResponse, StoreError> {
        self.inner.create_schedule(request).await
    }

    async fn list_builds(&self, filter: &BuildFilter) -> Result<Page<BuildResponse>, StoreError> {
        self.inner.list_builds(filter).await
    }

    async fn get_build(&self, id: Uuid) -> Result<BuildResponse, StoreError> {
        self.inner.get_build(id).await
    }

    async fn create_build(&self, request: BuildRequest) -> Result<BuildResponse, StoreError> {
        self.inner.create_build(request).await
    }

    async fn create_deployment(&self, request: DeploymentRequest) -> Result<DeploymentResponse, StoreError> {
        self.inner.create_deployment(request).await
    }

    async fn active_user(&self) -> Result<UserModel, StoreError> {
        self.inner.active_user().await
    }

    async fn active_workspace(&self) -> Result<WorkspaceModel, StoreError> {
        self.inner.active_workspace().await
    }

    async fn get_stack(&self, id: Uuid) -> Result<StackModel, StoreError> {
        self.inner.get_stack(id).await
    }

    async fn get_or_create_default_stack(&self) -> Result<StackModel, StoreError> {
        self.inner.get_or_create_default_stack().await
    }
}

fn coordinator(store: Arc<RacingStore>) -> Coordinator {
    Coordinator::new(store, Arc::new(RecordingStack::new()))
        .with_environment(EnvironmentConfig::default())
        .with_execution_guard(Arc::new(ExecutionGuard::new()))
}

#[tokio::test]
async fn lost_race_for_same_hash_returns_winner() {
    let store = Arc::new(RacingStore::new(Competitor::SameHash, 1));
    let coordinator = coordinator(store.clone());
    let mut pipeline = fixtures::training_pipeline();

    let registered = coordinator.register(&mut pipeline).await.unwrap();

    assert_eq!(*store.winners.lock(), vec![registered.id]);
    assert_eq!(registered.version(), "1");
    assert_eq!(store.inner.pipelines().len(), 1);
}

#[tokio::test]
async fn lost_race_for_version_number_retries_with_next_version() {
    let store = Arc::new(RacingStore::new(Competitor::OtherHash, 1));
    let coordinator = coordinator(store.clone());
    let mut pipeline = fixtures::training_pipeline();

    let registered = coordinator.register(&mut pipeline).await.unwrap();

    assert_eq!(registered.version(), "2");
    assert_eq!(store.inner.pipelines().len(), 2);
}

#[tokio::test]
async fn persistent_conflicts_are_surfaced() {
    let store = Arc::new(RacingStore::new(Competitor::OtherHash, usize::MAX));
    let coordinator = coordinator(store.clone());
    let mut pipeline = fixtures::training_pipeline();

    let err = coordinator.register(&mut pipeline).await.unwrap_err();

    assert!(matches!(
        err,
        stepflow::errors::StepflowError::Store(StoreError::Conflict { .. })
    ));
}
