//! Build selection for deployments.

use super::LocalRepositoryContext;
use crate::compiler::PipelineDeployment;
use crate::errors::{StackError, StepflowError};
use crate::stack::{BuildConfiguration, Stack};
use crate::store::{BuildFilter, BuildRequest, BuildResponse, MetadataStore};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Computes the checksum identifying a set of build configurations.
///
/// The checksum does not depend on the order of `configurations`.
#[must_use]
pub fn compute_build_checksum(configurations: &[BuildConfiguration], downloads_code: bool) -> String {
    let mut sorted: Vec<&BuildConfiguration> = configurations.iter().collect();
    sorted.sort_by(|a, b| (&a.key, &a.step_name).cmp(&(&b.key, &b.step_name)));

    let mut hasher = Sha256::new();
    for configuration in sorted {
        hasher.update(configuration.key.as_bytes());
        hasher.update(configuration.step_name.as_deref().unwrap_or_default().as_bytes());
        hasher.update(configuration.settings.to_string().as_bytes());
    }
    hasher.update(if downloads_code { b"code:1" } else { b"code:0" });
    hex::encode(hasher.finalize())
}

/// Decides whether build images can download code from the local repository.
///
/// Only a clean checkout is used. Deployments with an explicit build or
/// without build requirements never download code.
#[must_use]
pub fn verify_local_repository_context(
    deployment: &PipelineDeployment,
    requirements: &[BuildConfiguration],
    local_repository: Option<&LocalRepositoryContext>,
) -> bool {
    if deployment.build().is_some() || requirements.is_empty() {
        return false;
    }
    match local_repository {
        Some(repository) if repository.is_dirty => {
            warn!(
                pipeline = %deployment.pipeline_configuration().name,
                root = %repository.root.display(),
                "Code repository has uncommitted changes, code will be included in the build"
            );
            false
        }
        Some(_) => true,
        None => false,
    }
}

/// Collaborators and inputs shared by the build operations.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    /// Store that holds builds.
    pub store: &'a dyn MetadataStore,
    /// Stack the deployment runs on.
    pub stack: &'a dyn Stack,
    /// The compiled deployment.
    pub deployment: &'a PipelineDeployment,
    /// Registered pipeline, if any.
    pub pipeline_id: Option<Uuid>,
    /// Whether images download code at runtime.
    pub downloads_code: bool,
}

impl BuildContext<'_> {
    fn pipeline_name(&self) -> &str {
        &self.deployment.pipeline_configuration().name
    }
}

/// Creates a new build for the deployment.
///
/// Returns `None` if the stack runs the deployment without a build.
///
/// # Errors
///
/// Returns store errors.
pub async fn create_pipeline_build(
    context: BuildContext<'_>,
) -> Result<Option<BuildResponse>, StepflowError> {
    let configurations = context.stack.build_requirements(context.deployment);
    if configurations.is_empty() {
        debug!(pipeline = %context.pipeline_name(), "Stack requires no build");
        return Ok(None);
    }

    let user = context.store.active_user().await?;
    let workspace = context.store.active_workspace().await?;
    let checksum = compute_build_checksum(&configurations, context.downloads_code);
    let build = context
        .store
        .create_build(BuildRequest {
            stack_id: context.stack.id(),
            pipeline_id: context.pipeline_id,
            checksum,
            configurations,
            downloads_code: context.downloads_code,
            user: user.id,
            workspace: workspace.id,
        })
        .await?;

    info!(
        pipeline = %context.pipeline_name(),
        build_id = %build.id,
        images = build.body.configurations.len(),
        "Created pipeline build"
    );
    Ok(Some(build))
}

/// Returns the build to run the deployment with.
///
/// An explicit build from the run configuration wins. Otherwise an existing
/// build with the same stack and checksum is reused when `allow_build_reuse`
/// is set, and a new build is created if none matches.
///
/// # Errors
///
/// Returns a stack validation error if the explicit build belongs to another
/// stack, and store errors.
pub async fn reuse_or_create_pipeline_build(
    context: BuildContext<'_>,
    allow_build_reuse: bool,
) -> Result<Option<BuildResponse>, StepflowError> {
    if let Some(build_id) = context.deployment.build() {
        let build = context.store.get_build(build_id).await?;
        if build.body.stack_id != context.stack.id() {
            return Err(StackError::Validation {
                stack: context.stack.name(),
                pipeline: context.pipeline_name().to_string(),
                reason: format!(
                    "build '{build_id}' was created for stack '{}'",
                    build.body.stack_id
                ),
            }
            .into());
        }
        return Ok(Some(build));
    }

    if allow_build_reuse {
        let configurations = context.stack.build_requirements(context.deployment);
        if configurations.is_empty() {
            return Ok(None);
        }

        let filter = BuildFilter {
            stack_id: Some(context.stack.id()),
            checksum: Some(compute_build_checksum(&configurations, context.downloads_code)),
        };
        if let Some(existing) = context.store.list_builds(&filter).await?.into_first() {
            info!(
                pipeline = %context.pipeline_name(),
                build_id = %existing.id,
                "Reusing existing build"
            );
            return Ok(Some(existing));
        }
    }

    create_pipeline_build(context).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_checksum_ignores_order() {
        let a = BuildConfiguration::pipeline("orchestrator", json!({"python": "3.11"}));
        let b = BuildConfiguration::for_step("step_operator", "trainer", json!({}));

        assert_eq!(
            compute_build_checksum(&[a.clone(), b.clone()], false),
            compute_build_checksum(&[b, a.clone()], false)
        );
        assert_ne!(
            compute_build_checksum(&[a.clone()], false),
            compute_build_checksum(&[a], true)
        );
    }

    #[test]
    fn test_checksum_covers_settings() {
        let base = BuildConfiguration::pipeline("orchestrator", json!({"python": "3.11"}));
        let changed = BuildConfiguration::pipeline("orchestrator", json!({"python": "3.12"}));
        assert_ne!(
            compute_build_checksum(&[base], false),
            compute_build_checksum(&[changed], false)
        );
    }

    #[test]
    fn test_repository_context_requires_clean_checkout() {
        let deployment = crate::testing::fixtures::compiled_deployment().unwrap();
        let requirements = vec![BuildConfiguration::pipeline("orchestrator", json!({}))];
        let mut repository = LocalRepositoryContext {
            code_repository_id: Uuid::nil(),
            root: PathBuf::from("/work/repo"),
            current_commit: "abc".to_string(),
            is_dirty: false,
        };

        assert!(verify_local_repository_context(&deployment, &requirements, Some(&repository)));
        assert!(!verify_local_repository_context(&deployment, &[], Some(&repository)));
        assert!(!verify_local_repository_context(&deployment, &requirements, None));

        repository.is_dirty = true;
        assert!(!verify_local_repository_context(&deployment, &requirements, Some(&repository)));
    }
}
