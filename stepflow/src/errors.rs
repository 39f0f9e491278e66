//! Error types for the stepflow engine.
//!
//! Errors are split by who has to act on them: graph construction and
//! configuration errors are the user's to fix, store and stack errors come
//! from collaborators and are surfaced as-is, and compilation errors are
//! defects in the engine itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for stepflow operations.
#[derive(Debug, Error)]
pub enum StepflowError {
    /// The step invocation graph could not be built.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// The user supplied an invalid configuration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The compiler hit an internal inconsistency.
    #[error("{0}")]
    Compilation(#[from] CompilationError),

    /// The persistence collaborator failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The execution stack failed.
    #[error("{0}")]
    Stack(#[from] StackError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StepflowError {
    /// Returns true if the caller can fix this error by changing the pipeline
    /// definition or its configuration.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::Configuration(_))
    }

    /// Returns the contract error info attached to this error, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<ContractErrorInfo> {
        match self {
            Self::Graph(err) => Some(err.error_info()),
            Self::Configuration(err) => Some(err.error_info()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StepflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-002-DUPLICATE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors raised while building the step invocation graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A pipeline was activated while another one was already active.
    #[error("Unable to activate pipeline '{requested}': pipeline '{active}' is already active")]
    ConcurrentActivation {
        /// The pipeline that is currently active.
        active: String,
        /// The pipeline that tried to become active.
        requested: String,
    },

    /// A step invocation was added to a pipeline that is not active.
    #[error("Step invocations can only be added to the active pipeline, but pipeline '{pipeline}' is not active")]
    InactivePipeline {
        /// The pipeline that is not active.
        pipeline: String,
    },

    /// An input artifact was produced inside a different pipeline.
    #[error("Invalid input artifact '{input}' for step '{step}' in pipeline '{pipeline}': the artifact was produced by a step inside a different pipeline '{producer_pipeline}'")]
    CrossPipelineReference {
        /// The pipeline being built.
        pipeline: String,
        /// The step being invoked.
        step: String,
        /// The name of the offending input.
        input: String,
        /// The pipeline that produced the artifact.
        producer_pipeline: String,
    },

    /// The invocation id is already taken and suffixes are not allowed.
    #[error("Duplicate step invocation id '{id}' in pipeline '{pipeline}'")]
    DuplicateInvocation {
        /// The pipeline being built.
        pipeline: String,
        /// The duplicated id.
        id: String,
    },

    /// No free suffixed id could be found.
    #[error("Unable to find a unique invocation id for '{base}' in pipeline '{pipeline}'")]
    IdentifierExhaustion {
        /// The pipeline being built.
        pipeline: String,
        /// The base id that was probed.
        base: String,
    },

    /// An explicit upstream step does not exist in the pipeline.
    #[error("Step '{step}' in pipeline '{pipeline}' is configured to run after unknown step '{upstream}'")]
    UnknownUpstreamStep {
        /// The pipeline being built.
        pipeline: String,
        /// The step being invoked.
        step: String,
        /// The unknown upstream id.
        upstream: String,
    },
}

impl GraphError {
    /// Returns the diagnostic info for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::ConcurrentActivation { active, .. } => {
                ContractErrorInfo::new("GRAPH-001-ACTIVE", "Another pipeline is already active")
                    .with_fix_hint("Prepare pipelines one at a time; call other pipelines from inside an entrypoint to compose them.")
                    .with_context_entry("active", active.clone())
            }
            Self::InactivePipeline { pipeline } => {
                ContractErrorInfo::new("GRAPH-001-INACTIVE", "Pipeline is not active")
                    .with_context_entry("pipeline", pipeline.clone())
            }
            Self::CrossPipelineReference { pipeline, input, .. } => ContractErrorInfo::new(
                "GRAPH-003-CROSS_PIPELINE",
                "Input artifact belongs to a different pipeline",
            )
            .with_fix_hint("Only pass artifacts produced by steps of the same pipeline.")
            .with_context_entry("pipeline", pipeline.clone())
            .with_context_entry("input", input.clone()),
            Self::DuplicateInvocation { pipeline, id } => {
                ContractErrorInfo::new("GRAPH-002-DUPLICATE", "Duplicate step invocation id")
                    .with_fix_hint("Pass a unique custom id or allow id suffixes.")
                    .with_context_entry("pipeline", pipeline.clone())
                    .with_context_entry("id", id.clone())
            }
            Self::IdentifierExhaustion { pipeline, base } => {
                ContractErrorInfo::new("GRAPH-002-EXHAUSTED", "No unique invocation id left")
                    .with_context_entry("pipeline", pipeline.clone())
                    .with_context_entry("base", base.clone())
            }
            Self::UnknownUpstreamStep { pipeline, upstream, .. } => {
                ContractErrorInfo::new("GRAPH-004-MISSING_DEP", "Upstream step not found")
                    .with_fix_hint("Ensure the upstream step is invoked before the step that runs after it.")
                    .with_context_entry("pipeline", pipeline.clone())
                    .with_context_entry("upstream", upstream.clone())
            }
        }
    }
}

/// Errors caused by invalid user configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A settings key is neither a general key nor offered by the stack.
    #[error("Invalid settings key '{key}' for pipeline '{pipeline}': {reason}")]
    UnknownSettingKey {
        /// The pipeline being configured.
        pipeline: String,
        /// The offending key.
        key: String,
        /// Why the key was rejected.
        reason: String,
    },

    /// The run configuration references a step that does not exist.
    #[error("Configuration for pipeline '{pipeline}' references unknown step '{step}'")]
    UnknownStep {
        /// The pipeline being configured.
        pipeline: String,
        /// The unknown step id.
        step: String,
    },

    /// A step configuration references an output that the step does not have.
    #[error("Step '{step}' of pipeline '{pipeline}' has no output named '{output}'")]
    UnknownOutput {
        /// The pipeline being configured.
        pipeline: String,
        /// The step id.
        step: String,
        /// The unknown output name.
        output: String,
    },

    /// Step inputs do not match the step signature.
    #[error("Invalid inputs for step '{step}' of pipeline '{pipeline}': {message}")]
    InvalidStepInputs {
        /// The pipeline being built.
        pipeline: String,
        /// The step being invoked.
        step: String,
        /// What is wrong.
        message: String,
    },

    /// No materializer is configured or registered for an output type.
    #[error("No materializer found for output '{output}' (type '{type_name}') of step '{step}' in pipeline '{pipeline}'")]
    MissingMaterializer {
        /// The pipeline being compiled.
        pipeline: String,
        /// The step id.
        step: String,
        /// The output name.
        output: String,
        /// The output type.
        type_name: String,
    },

    /// A hook specification could not be resolved to a source.
    #[error("Invalid {field} hook for '{owner}': {reason}")]
    InvalidHook {
        /// The pipeline or step owning the hook.
        owner: String,
        /// Either `on_failure` or `on_success`.
        field: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Pipeline entrypoint arguments are missing or invalid.
    #[error("Invalid or missing inputs for the entrypoint of pipeline '{pipeline}': {message}")]
    InvalidEntrypointArguments {
        /// The pipeline being prepared.
        pipeline: String,
        /// What is wrong.
        message: String,
    },

    /// The pipeline needs arguments before it can be compiled.
    #[error("Failed while trying to prepare pipeline '{pipeline}'. The entrypoint of the pipeline requires arguments. Please prepare the pipeline by calling `prepare(...)` and try again")]
    NotPrepared {
        /// The pipeline that is not prepared.
        pipeline: String,
    },

    /// The run configuration file could not be read or parsed.
    #[error("Invalid run configuration '{source_name}': {message}")]
    InvalidRunConfiguration {
        /// The configuration file or origin.
        source_name: String,
        /// Parser or IO message.
        message: String,
    },

    /// A pipeline or step name is empty.
    #[error("{kind} name cannot be empty or whitespace-only")]
    EmptyName {
        /// `Pipeline` or `Step`.
        kind: String,
    },
}

impl ConfigurationError {
    /// Returns the diagnostic info for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let (code, summary, hint) = match self {
            Self::UnknownSettingKey { .. } => (
                "CONFIG-001-SETTING_KEY",
                "Unknown settings key",
                Some("Use a general settings key or `<component_type>.<flavor>` of a component in the active stack."),
            ),
            Self::UnknownStep { .. } => ("CONFIG-002-UNKNOWN_STEP", "Unknown step", Some("Check the step ids in the run configuration.")),
            Self::UnknownOutput { .. } => ("CONFIG-003-UNKNOWN_OUTPUT", "Unknown step output", None),
            Self::InvalidStepInputs { .. } => ("CONFIG-004-INPUTS", "Invalid step inputs", None),
            Self::MissingMaterializer { .. } => (
                "CONFIG-005-MATERIALIZER",
                "Missing materializer",
                Some("Configure an output materializer or register a default materializer for the output type."),
            ),
            Self::InvalidHook { .. } => ("CONFIG-006-HOOK", "Invalid hook", Some("Use a source path of the form `module.function`.")),
            Self::InvalidEntrypointArguments { .. } => (
                "CONFIG-007-ARGUMENTS",
                "Invalid entrypoint arguments",
                Some("Only JSON serializable inputs are allowed as pipeline inputs."),
            ),
            Self::NotPrepared { .. } => ("CONFIG-008-NOT_PREPARED", "Pipeline is not prepared", None),
            Self::InvalidRunConfiguration { .. } => ("CONFIG-009-RUN_CONFIG", "Invalid run configuration", None),
            Self::EmptyName { .. } => ("CONFIG-010-NAME", "Empty name", None),
        };
        let info = ContractErrorInfo::new(code, summary);
        match hint {
            Some(hint) => info.with_fix_hint(hint),
            None => info,
        }
    }
}

/// Internal compilation failure. Seeing one of these is a bug.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Internal compilation error in pipeline '{pipeline}': {message}")]
pub struct CompilationError {
    /// The pipeline being compiled.
    pub pipeline: String,
    /// What went wrong.
    pub message: String,
}

impl CompilationError {
    /// Creates a new compilation error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested entity does not exist.
    #[error("{entity} '{key}' not found")]
    NotFound {
        /// The entity kind.
        entity: String,
        /// The lookup key.
        key: String,
    },

    /// A uniqueness constraint was violated.
    #[error("{entity} '{key}' already exists")]
    Conflict {
        /// The entity kind.
        entity: String,
        /// The conflicting key.
        key: String,
    },

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Returns true for uniqueness conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors returned by the execution stack.
#[derive(Debug, Error)]
pub enum StackError {
    /// The deployment failed the stack's pre-flight validation.
    #[error("Stack '{stack}' rejected deployment of pipeline '{pipeline}': {reason}")]
    Validation {
        /// The stack name.
        stack: String,
        /// The pipeline name.
        pipeline: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Dispatching the deployment failed.
    #[error("Stack '{stack}' failed to deploy pipeline '{pipeline}': {reason}")]
    Deployment {
        /// The stack name.
        stack: String,
        /// The pipeline name.
        pipeline: String,
        /// Why it failed.
        reason: String,
    },

    /// Any other backend failure.
    #[error("Stack backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("step", "trainer");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("step"), Some(&"trainer".to_string()));
    }

    #[test]
    fn test_graph_errors_name_pipeline() {
        let err = GraphError::DuplicateInvocation {
            pipeline: "training".to_string(),
            id: "loader".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("training"));
        assert!(message.contains("loader"));
        assert_eq!(err.error_info().code, "GRAPH-002-DUPLICATE");
    }

    #[test]
    fn test_user_error_classification() {
        let graph: StepflowError = GraphError::InactivePipeline {
            pipeline: "p".to_string(),
        }
        .into();
        let config: StepflowError = ConfigurationError::NotPrepared {
            pipeline: "p".to_string(),
        }
        .into();
        let internal: StepflowError = CompilationError::new("p", "boom").into();
        let store: StepflowError = StoreError::not_found("Pipeline", "p").into();

        assert!(graph.is_user_error());
        assert!(config.is_user_error());
        assert!(!internal.is_user_error());
        assert!(!store.is_user_error());
        assert!(config.error_info().is_some());
        assert!(store.error_info().is_none());
    }

    #[test]
    fn test_store_conflict() {
        let err = StoreError::conflict("Pipeline", "training:3");
        assert!(err.is_conflict());
        assert!(!StoreError::not_found("Pipeline", "x").is_conflict());
    }

    #[test]
    fn test_setting_key_error_message() {
        let err = ConfigurationError::UnknownSettingKey {
            pipeline: "training".to_string(),
            key: "orchestrator.kubeflow".to_string(),
            reason: "not part of the stack".to_string(),
        };
        assert!(err.to_string().contains("orchestrator.kubeflow"));
        assert_eq!(err.error_info().code, "CONFIG-001-SETTING_KEY");
    }
}
