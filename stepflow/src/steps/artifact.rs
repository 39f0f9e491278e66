//! Artifact references passed between step invocations.

use crate::config::{ExternalArtifactConfiguration, Source};
use crate::errors::ConfigurationError;
use crate::identity::content_hash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Reference to an output of a step invocation.
///
/// Artifacts are tied to the preparation pass that produced them and can only
/// be used as inputs within that pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepArtifact {
    /// Id of the producing invocation.
    pub invocation_id: String,
    /// Name of the output.
    pub output_name: String,
    /// Name of the producing pipeline.
    pub pipeline_name: String,
    /// Preparation pass that produced the artifact.
    pub pass_id: Uuid,
}

/// An artifact supplied from outside the pipeline.
///
/// Either an inline value that is uploaded before the step runs, or the id of
/// an artifact that already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalArtifact {
    value: Option<Value>,
    id: Option<Uuid>,
    materializer: Option<Source>,
}

impl ExternalArtifact {
    /// Creates an external artifact from an inline value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self {
            value: Some(value),
            id: None,
            materializer: None,
        }
    }

    /// Creates an external artifact referencing an existing artifact.
    #[must_use]
    pub fn from_id(id: Uuid) -> Self {
        Self {
            value: None,
            id: Some(id),
            materializer: None,
        }
    }

    /// Sets the materializer used to upload the value.
    #[must_use]
    pub fn with_materializer(mut self, source: Source) -> Self {
        self.materializer = Some(source);
        self
    }

    /// Returns the inline value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the referenced artifact id, if any.
    #[must_use]
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    /// Resolves the artifact into its serializable configuration.
    ///
    /// The content hash is computed over the inline value, or over the id for
    /// referenced artifacts.
    #[must_use]
    pub fn resolve(&self) -> ExternalArtifactConfiguration {
        let content_hash = match (&self.value, self.id) {
            (Some(value), _) => content_hash(value),
            (None, Some(id)) => content_hash(&Value::String(id.to_string())),
            (None, None) => content_hash(&Value::Null),
        };
        ExternalArtifactConfiguration {
            id: self.id,
            value: self.value.clone(),
            content_hash,
            materializer_source: self.materializer.clone(),
        }
    }
}

/// Outputs returned by a step invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutputs {
    invocation_id: String,
    pipeline_name: String,
    artifacts: BTreeMap<String, StepArtifact>,
}

impl StepOutputs {
    pub(crate) fn new(
        invocation_id: String,
        pipeline_name: String,
        artifacts: BTreeMap<String, StepArtifact>,
    ) -> Self {
        Self {
            invocation_id,
            pipeline_name,
            artifacts,
        }
    }

    /// Returns the id of the invocation that produced these outputs.
    #[must_use]
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Returns the named output.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOutput` if the step declares no such output.
    pub fn get(&self, name: &str) -> Result<StepArtifact, ConfigurationError> {
        self.artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownOutput {
                pipeline: self.pipeline_name.clone(),
                step: self.invocation_id.clone(),
                output: name.to_string(),
            })
    }

    /// Returns the only output of a single-output step.
    #[must_use]
    pub fn single(&self) -> Option<StepArtifact> {
        if self.artifacts.len() == 1 {
            self.artifacts.values().next().cloned()
        } else {
            None
        }
    }

    /// Iterates over all outputs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &StepArtifact)> {
        self.artifacts.iter()
    }

    /// Returns the number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if the step has no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(output: &str) -> StepArtifact {
        StepArtifact {
            invocation_id: "loader".to_string(),
            output_name: output.to_string(),
            pipeline_name: "training".to_string(),
            pass_id: Uuid::nil(),
        }
    }

    #[test]
    fn test_external_value_hash_is_stable() {
        let a = ExternalArtifact::from_value(json!({"b": 1, "a": [1, 2]})).resolve();
        let b = ExternalArtifact::from_value(json!({"a": [1, 2], "b": 1})).resolve();
        assert_eq!(a.content_hash, b.content_hash);

        let c = ExternalArtifact::from_value(json!({"a": [2, 1], "b": 1})).resolve();
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[test]
    fn test_external_id() {
        let id = Uuid::new_v4();
        let resolved = ExternalArtifact::from_id(id).resolve();
        assert_eq!(resolved.id, Some(id));
        assert!(resolved.value.is_none());
    }

    #[test]
    fn test_outputs_access() {
        let outputs = StepOutputs::new(
            "loader".to_string(),
            "training".to_string(),
            [("data".to_string(), artifact("data"))].into_iter().collect(),
        );

        assert_eq!(outputs.single(), Some(artifact("data")));
        assert_eq!(outputs.get("data").unwrap().output_name, "data");
        assert!(outputs.get("labels").is_err());
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_single_with_multiple_outputs() {
        let outputs = StepOutputs::new(
            "loader".to_string(),
            "training".to_string(),
            [
                ("a".to_string(), artifact("a")),
                ("b".to_string(), artifact("b")),
            ]
            .into_iter()
            .collect(),
        );
        assert!(outputs.single().is_none());
    }
}
