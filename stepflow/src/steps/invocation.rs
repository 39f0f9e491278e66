//! Step invocations: one placement of a step inside a pipeline graph.

use super::{ExternalArtifact, StepArtifact, StepDefinition};
use crate::config::{ConfigMap, StepConfigurationUpdate};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One scheduled call of a step within a pipeline.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    /// Unique id within the pipeline.
    pub id: String,
    /// The shared step definition.
    pub step: Arc<dyn StepDefinition>,
    /// Inputs produced by upstream invocations.
    pub input_artifacts: BTreeMap<String, StepArtifact>,
    /// Inputs supplied from outside the pipeline.
    pub external_artifacts: BTreeMap<String, ExternalArtifact>,
    /// Parameter values passed at call time.
    pub parameters: ConfigMap,
    /// Ids of invocations this one depends on.
    pub upstream_steps: BTreeSet<String>,
    /// Configuration passed at call time.
    pub configuration: StepConfigurationUpdate,
}

impl StepInvocation {
    /// Returns the invocation ids that produce the input artifacts.
    pub fn input_producers(&self) -> impl Iterator<Item = &str> {
        self.input_artifacts
            .values()
            .map(|artifact| artifact.invocation_id.as_str())
    }
}

/// Request to add an invocation to a graph.
#[derive(Debug, Clone)]
pub struct NewInvocation {
    pub(crate) step: Arc<dyn StepDefinition>,
    pub(crate) input_artifacts: BTreeMap<String, StepArtifact>,
    pub(crate) external_artifacts: BTreeMap<String, ExternalArtifact>,
    pub(crate) parameters: ConfigMap,
    pub(crate) upstream_steps: BTreeSet<String>,
    pub(crate) custom_id: Option<String>,
    pub(crate) allow_id_suffix: bool,
    pub(crate) configuration: StepConfigurationUpdate,
}

impl NewInvocation {
    /// Creates a request for `step` with no inputs.
    #[must_use]
    pub fn new(step: Arc<dyn StepDefinition>) -> Self {
        Self {
            step,
            input_artifacts: BTreeMap::new(),
            external_artifacts: BTreeMap::new(),
            parameters: ConfigMap::new(),
            upstream_steps: BTreeSet::new(),
            custom_id: None,
            allow_id_suffix: true,
            configuration: StepConfigurationUpdate::default(),
        }
    }

    /// Adds an input produced by an upstream invocation.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, artifact: StepArtifact) -> Self {
        self.input_artifacts.insert(name.into(), artifact);
        self
    }

    /// Adds an externally supplied input.
    #[must_use]
    pub fn with_external(mut self, name: impl Into<String>, artifact: ExternalArtifact) -> Self {
        self.external_artifacts.insert(name.into(), artifact);
        self
    }

    /// Sets a parameter value.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Adds an explicit upstream dependency.
    #[must_use]
    pub fn with_upstream(mut self, id: impl Into<String>) -> Self {
        self.upstream_steps.insert(id.into());
        self
    }

    /// Requests a specific invocation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.custom_id = Some(id.into());
        self
    }

    /// Sets whether a numeric suffix may be appended to a taken id.
    #[must_use]
    pub const fn with_allow_id_suffix(mut self, allow: bool) -> Self {
        self.allow_id_suffix = allow;
        self
    }

    /// Sets the call-time configuration.
    #[must_use]
    pub fn with_configuration(mut self, configuration: StepConfigurationUpdate) -> Self {
        self.configuration = configuration;
        self
    }

    /// Returns the base id before any suffix is applied.
    #[must_use]
    pub fn base_id(&self) -> &str {
        self.custom_id.as_deref().unwrap_or_else(|| self.step.name())
    }
}
