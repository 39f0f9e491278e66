//! The structural pipeline spec used for versioning.

use crate::config::{ConfigMap, Source};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Current version of the spec format.
pub const SPEC_VERSION: &str = "0.4";

/// Where a step input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Id of the producing invocation.
    pub step_name: String,
    /// Name of the producing output.
    pub output_name: String,
}

/// Structural description of one step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Source of the step function.
    pub source: Source,
    /// Sorted ids of upstream invocations.
    pub upstream_steps: Vec<String>,
    /// Inputs by name.
    pub inputs: BTreeMap<String, InputSpec>,
    /// The invocation id.
    pub pipeline_parameter_name: String,
}

/// Environment-independent projection of a compiled pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Spec format version.
    pub version: String,
    /// Source of the pipeline entrypoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Entrypoint arguments.
    #[serde(default)]
    pub parameters: ConfigMap,
    /// Steps in invocation order.
    pub steps: Vec<StepSpec>,
}

impl PipelineSpec {
    /// Serializes the spec with every source rendered as its import path.
    ///
    /// Used for hashing: the result does not depend on how sources are
    /// represented internally.
    #[must_use]
    pub fn json_with_string_sources(&self) -> String {
        let steps: Vec<Value> = self
            .steps
            .iter()
            .map(|step| {
                json!({
                    "source": step.source.import_path(),
                    "upstream_steps": step.upstream_steps,
                    "inputs": step.inputs.iter().map(|(name, input)| {
                        (name.clone(), json!({
                            "step_name": input.step_name,
                            "output_name": input.output_name,
                        }))
                    }).collect::<serde_json::Map<String, Value>>(),
                    "pipeline_parameter_name": step.pipeline_parameter_name,
                })
            })
            .collect();

        let mut spec = json!({
            "version": self.version,
            "parameters": self.parameters,
            "steps": steps,
        });
        if let (Some(source), Some(object)) = (&self.source, spec.as_object_mut()) {
            object.insert("source".to_string(), Value::String(source.import_path()));
        }
        spec.to_string()
    }
}
