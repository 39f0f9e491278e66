//! Registration, build and run orchestration.
//!
//! The [`Coordinator`] drives the side effects of a pipeline against the
//! metadata store and the execution stack. Within one run the requests are
//! strictly ordered: compile, register pipeline, register schedule, resolve
//! build, create deployment, dispatch.

mod build;
mod code_repository;
mod guard;

pub use build::{
    compute_build_checksum, create_pipeline_build, reuse_or_create_pipeline_build,
    verify_local_repository_context, BuildContext,
};
pub use code_repository::{CodeRepository, LocalRepositoryContext, NoCodeRepository};
#[cfg(test)]
pub use code_repository::MockCodeRepository;
pub use guard::{ExecutionGuard, SuppressionGuard};

use crate::compiler::{format_name_template, Compiler, PipelineDeployment, PipelineSpec};
use crate::config::{EnvironmentConfig, PipelineConfiguration, PipelineRunConfiguration};
use crate::errors::{StepflowError, StoreError};
use crate::events::{self, EventSink, PIPELINE_BUILD, PIPELINE_REGISTERED, PIPELINE_RUN};
use crate::identity::{compute_version_hash, CacheKeyEngine};
use crate::pipeline::Pipeline;
use crate::stack::{LocalStack, Stack};
use crate::store::{
    validate_active_stack, BuildResponse, DeploymentRequest, DeploymentResponse, MetadataStore,
    PipelineFilter, PipelineRequest, PipelineResponse, ScheduleRequest, ScheduleResponse,
    UNVERSIONED,
};
use anyhow::anyhow;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Number of times registration re-reads the store after losing a race.
const MAX_REGISTRATION_ATTEMPTS: usize = 3;

/// Records created by a dispatched run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecords {
    /// Registered pipeline version, unless the run was unlisted.
    pub pipeline: Option<PipelineResponse>,
    /// Registered schedule, for scheduled runs.
    pub schedule: Option<ScheduleResponse>,
    /// Build the deployment runs with.
    pub build: Option<BuildResponse>,
    /// The dispatched deployment.
    pub deployment: DeploymentResponse,
}

/// Result of [`Coordinator::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Execution is suppressed; nothing was compiled, registered or dispatched.
    Suppressed,
    /// The deployment was handed to the stack.
    Dispatched(Box<RunRecords>),
}

impl RunOutcome {
    /// Returns true if the run was suppressed.
    #[must_use]
    pub const fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }

    /// Returns the records of a dispatched run.
    #[must_use]
    pub fn records(&self) -> Option<&RunRecords> {
        match self {
            Self::Suppressed => None,
            Self::Dispatched(records) => Some(records),
        }
    }
}

/// Orchestrates registration, builds and runs.
pub struct Coordinator {
    store: Arc<dyn MetadataStore>,
    stack: Arc<dyn Stack>,
    code_repository: Arc<dyn CodeRepository>,
    compiler: Compiler,
    environment: EnvironmentConfig,
    execution_guard: Arc<ExecutionGuard>,
    events: Arc<dyn EventSink>,
    source_root: PathBuf,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("stack", &self.stack.name())
            .field("environment", &self.environment)
            .field("source_root", &self.source_root)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Creates a coordinator for `stack`.
    ///
    /// Environment controls are read from the process environment, and the
    /// process-wide execution guard and event sink are used.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, stack: Arc<dyn Stack>) -> Self {
        Self {
            store,
            stack,
            code_repository: Arc::new(NoCodeRepository),
            compiler: Compiler::new(),
            environment: EnvironmentConfig::from_env(),
            execution_guard: ExecutionGuard::global(),
            events: events::get_event_sink(),
            source_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a coordinator for the stack with `stack_id`, falling back to
    /// the default stack. The stack runs locally.
    ///
    /// # Errors
    ///
    /// Returns store errors other than a missing stack.
    pub async fn for_active_stack(
        store: Arc<dyn MetadataStore>,
        stack_id: Option<Uuid>,
    ) -> Result<Self, StepflowError> {
        let model = validate_active_stack(store.as_ref(), stack_id).await?;
        Ok(Self::new(store, Arc::new(LocalStack::new(model))))
    }

    /// Sets the code repository lookup.
    #[must_use]
    pub fn with_code_repository(mut self, code_repository: Arc<dyn CodeRepository>) -> Self {
        self.code_repository = code_repository;
        self
    }

    /// Sets the compiler.
    #[must_use]
    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Sets the environment controls.
    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentConfig) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the execution guard.
    #[must_use]
    pub fn with_execution_guard(mut self, guard: Arc<ExecutionGuard>) -> Self {
        self.execution_guard = guard;
        self
    }

    /// Sets the analytics event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the directory code references are relative to.
    #[must_use]
    pub fn with_source_root(mut self, source_root: impl Into<PathBuf>) -> Self {
        self.source_root = source_root.into();
        self
    }

    /// Returns the metadata store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Returns the execution stack.
    #[must_use]
    pub fn stack(&self) -> &Arc<dyn Stack> {
        &self.stack
    }

    /// Returns the execution guard.
    #[must_use]
    pub fn execution_guard(&self) -> &Arc<ExecutionGuard> {
        &self.execution_guard
    }

    /// Registers the pipeline, reusing an existing version with the same
    /// version hash.
    ///
    /// Run options and run configuration files are not part of the
    /// registered version.
    ///
    /// # Errors
    ///
    /// Returns preparation, compilation and store errors.
    pub async fn register(&self, pipeline: &mut Pipeline) -> Result<PipelineResponse, StepflowError> {
        pipeline.prepare_if_possible()?;

        if *pipeline.configuration() != PipelineConfiguration::new(pipeline.name()) {
            warn!(
                pipeline = %pipeline.name(),
                "Pipeline has custom configuration that is not registered with the pipeline"
            );
        }

        let (_, spec) =
            self.compiler
                .compile_with(pipeline, self.stack.as_ref(), &PipelineRunConfiguration::new())?;
        self.register_spec(pipeline, &spec).await
    }

    /// Registers a compiled spec of `pipeline`.
    ///
    /// A version with the same hash is returned unchanged. Otherwise a new
    /// version `latest + 1` is created. If another registrant wins the race
    /// for that version number, the store is read again.
    ///
    /// # Errors
    ///
    /// Returns store errors, or a conflict if the race is lost on every
    /// attempt.
    pub async fn register_spec(
        &self,
        pipeline: &Pipeline,
        spec: &PipelineSpec,
    ) -> Result<PipelineResponse, StepflowError> {
        let name = pipeline.name();
        let version_hash = compute_version_hash(
            spec,
            name,
            pipeline.definition().source_code(),
            |id| pipeline.step_source_code(id),
        )?;

        for attempt in 1..=MAX_REGISTRATION_ATTEMPTS {
            if let Some(existing) = self.find_registered(name, &version_hash).await? {
                info!(
                    pipeline = %name,
                    version = %existing.version(),
                    "Reusing registered pipeline version"
                );
                return Ok(existing);
            }

            let version = self
                .latest_version(name)
                .await?
                .map_or(1, |latest| latest + 1);
            let user = self.store.active_user().await?;
            let workspace = self.store.active_workspace().await?;
            let request = PipelineRequest {
                name: name.to_string(),
                version: version.to_string(),
                version_hash: version_hash.clone(),
                spec: spec.clone(),
                docstring: pipeline.definition().docstring().map(str::to_string),
                user: user.id,
                workspace: workspace.id,
            };

            match self.store.create_pipeline(request).await {
                Ok(registered) => {
                    info!(pipeline = %name, version, "Registered new pipeline version");
                    self.emit_registered(&registered).await;
                    return Ok(registered);
                }
                Err(err) if err.is_conflict() => {
                    info!(
                        pipeline = %name,
                        version,
                        attempt,
                        "Pipeline version registered concurrently, reading it back"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::conflict("Pipeline", format!("{name}:{version_hash}")).into())
    }

    /// Compiles and registers the pipeline and creates a build for it.
    ///
    /// Returns `None` if the stack needs no build.
    ///
    /// # Errors
    ///
    /// Returns preparation, compilation and store errors.
    pub async fn build(&self, pipeline: &mut Pipeline) -> Result<Option<BuildResponse>, StepflowError> {
        let stack = self.stack.as_ref();
        let (deployment, spec) = self.compiler.compile(pipeline, stack)?;
        let registered = self.register_spec(pipeline, &spec).await?;

        let local_repository = self.code_repository.find_active_repository();
        let requirements = stack.build_requirements(&deployment);
        let downloads_code =
            verify_local_repository_context(&deployment, &requirements, local_repository.as_ref());

        let build = create_pipeline_build(BuildContext {
            store: self.store.as_ref(),
            stack,
            deployment: &deployment,
            pipeline_id: Some(registered.id),
            downloads_code,
        })
        .await?;

        self.events
            .emit(
                PIPELINE_BUILD,
                Some(json!({
                    "pipeline": pipeline.name(),
                    "stack": stack.name(),
                    "build_id": build.as_ref().map(|build| build.id),
                })),
            )
            .await;
        Ok(build)
    }

    /// Compiles, registers and dispatches a run of the pipeline.
    ///
    /// Returns [`RunOutcome::Suppressed`] without any side effect if execution
    /// is suppressed by the environment or by a dispatch in flight.
    ///
    /// # Errors
    ///
    /// Returns preparation, compilation, store and stack errors.
    pub async fn run(&self, pipeline: &mut Pipeline) -> Result<RunOutcome, StepflowError> {
        if self.environment.prevent_pipeline_execution || self.execution_guard.is_suppressed() {
            info!(
                pipeline = %pipeline.name(),
                "Preventing execution of pipeline, execution is suppressed"
            );
            return Ok(RunOutcome::Suppressed);
        }

        let stack = self.stack.as_ref();
        let (deployment, spec) = self.compiler.compile(pipeline, stack)?;

        let register = !(pipeline.run_options().unlisted || self.environment.skip_pipeline_registration);
        let registered = if register {
            Some(self.register_spec(pipeline, &spec).await?)
        } else {
            None
        };
        let pipeline_id = registered.as_ref().map(|registered| registered.id);

        let user = self.store.active_user().await?;
        let workspace = self.store.active_workspace().await?;

        let schedule = match deployment.schedule() {
            Some(schedule) => {
                let name = schedule.name.clone().unwrap_or_else(|| {
                    format_name_template(deployment.run_name_template(), Utc::now())
                });
                let created = self
                    .store
                    .create_schedule(ScheduleRequest {
                        name,
                        pipeline_id,
                        stack_id: stack.id(),
                        active: true,
                        schedule: schedule.clone(),
                        user: user.id,
                        workspace: workspace.id,
                    })
                    .await?;
                info!(
                    pipeline = %pipeline.name(),
                    schedule = %created.body.name,
                    "Created schedule"
                );
                Some(created)
            }
            None => None,
        };

        let local_repository = self.code_repository.find_active_repository();
        let requirements = stack.build_requirements(&deployment);
        let downloads_code =
            verify_local_repository_context(&deployment, &requirements, local_repository.as_ref());
        let build = reuse_or_create_pipeline_build(
            BuildContext {
                store: self.store.as_ref(),
                stack,
                deployment: &deployment,
                pipeline_id,
                downloads_code,
            },
            !pipeline.run_options().prevent_build_reuse,
        )
        .await?;

        let code_reference = local_repository
            .as_ref()
            .and_then(|repository| repository.code_reference(&self.source_root));
        let step_cache_keys =
            CacheKeyEngine::from_deployment(&deployment, |id| pipeline.step_source_code(id))?
                .cache_keys()?;

        let mut request = DeploymentRequest::from_deployment(&deployment, user.id, workspace.id);
        request.pipeline_id = pipeline_id;
        request.build_id = build.as_ref().map(|build| build.id);
        request.schedule_id = schedule.as_ref().map(|schedule| schedule.id);
        request.code_reference = code_reference;
        request.step_cache_keys = step_cache_keys;
        let deployment_record = self.store.create_deployment(request).await?;

        let caching = if deployment.pipeline_configuration().cache_enabled() {
            "enabled"
        } else {
            "disabled"
        };
        let target = if register {
            format!("pipeline `{}`", pipeline.name())
        } else {
            "unlisted pipeline".to_string()
        };
        info!(
            "{} {target} on stack `{}` (caching {caching})",
            if schedule.is_some() { "Scheduling" } else { "Running" },
            stack.name()
        );

        stack.prepare_pipeline_deployment(&deployment_record).await?;
        {
            let _suppressed = self.execution_guard.suppress();
            stack.deploy_pipeline(&deployment_record).await?;
        }

        self.events
            .emit(PIPELINE_RUN, Some(run_metadata(&deployment, stack, schedule.is_some())))
            .await;

        Ok(RunOutcome::Dispatched(Box::new(RunRecords {
            pipeline: registered,
            schedule,
            build,
            deployment: deployment_record,
        })))
    }

    async fn find_registered(
        &self,
        name: &str,
        version_hash: &str,
    ) -> Result<Option<PipelineResponse>, StoreError> {
        let filter = PipelineFilter::named(name)
            .with_version_hash(version_hash)
            .with_size(1);
        Ok(self.store.list_pipelines(&filter).await?.into_first())
    }

    async fn latest_version(&self, name: &str) -> Result<Option<u64>, StoreError> {
        let filter = PipelineFilter::named(name).with_size(1);
        let Some(latest) = self.store.list_pipelines(&filter).await?.into_first() else {
            return Ok(None);
        };
        if latest.version() == UNVERSIONED {
            return Ok(None);
        }
        latest.version().parse().map(Some).map_err(|err| {
            StoreError::Backend(anyhow!(
                "pipeline '{name}' has non-numeric version '{}': {err}",
                latest.version()
            ))
        })
    }

    async fn emit_registered(&self, registered: &PipelineResponse) {
        self.events
            .emit(
                PIPELINE_REGISTERED,
                Some(json!({
                    "pipeline": registered.name(),
                    "version": registered.version(),
                })),
            )
            .await;
    }
}

fn run_metadata(deployment: &PipelineDeployment, stack: &dyn Stack, scheduled: bool) -> Value {
    let custom_materializer = deployment.steps().iter().any(|step| {
        step.config
            .outputs
            .values()
            .any(|output| !output.materializer_source.internal)
    });
    json!({
        "pipeline": deployment.pipeline_configuration().name,
        "stack": stack.name(),
        "total_steps": deployment.steps().len(),
        "schedule": scheduled,
        "custom_materializer": custom_materializer,
    })
}
