//! Sample steps and pipelines.

use super::RecordingStack;
use crate::compiler::{Compiler, PipelineDeployment};
use crate::config::Source;
use crate::errors::{ConfigurationError, StepflowError};
use crate::pipeline::Pipeline;
use crate::steps::{step, StepDefinition};
use serde_json::{json, Value};
use std::sync::Arc;

/// Source code of [`loader_step`].
pub const LOADER_SOURCE: &str = "def loader(rows: int = 100) -> dict:\n    return {\"rows\": rows}\n";
/// Source code of [`trainer_step`].
pub const TRAINER_SOURCE: &str =
    "def trainer(dataset: dict, lr: float = 0.01) -> dict:\n    return {\"weights\": [lr]}\n";
/// Source code of [`evaluator_step`].
pub const EVALUATOR_SOURCE: &str =
    "def evaluator(model: dict, dataset: dict) -> dict:\n    return {\"accuracy\": 1.0}\n";
/// Source code of [`training_pipeline`].
pub const TRAINING_SOURCE: &str = "def training(rows: int = 100):\n    data = loader(rows=rows)\n    model = trainer(data)\n    evaluator(model, data)\n";

/// A step producing a `dataset` output, with a defaulted `rows` parameter.
///
/// # Errors
///
/// Never fails in practice; returns the builder's validation result.
pub fn loader_step() -> Result<Arc<dyn StepDefinition>, ConfigurationError> {
    step("loader")
        .source(Source::new("steps.data", "loader"))
        .source_code(LOADER_SOURCE)
        .output("dataset", "dict")
        .parameter("rows", Some(json!(100)))
        .build()
}

/// A step turning a `dataset` into a `model`.
///
/// # Errors
///
/// See [`loader_step`].
pub fn trainer_step() -> Result<Arc<dyn StepDefinition>, ConfigurationError> {
    step("trainer")
        .source(Source::new("steps.training", "trainer"))
        .source_code(TRAINER_SOURCE)
        .input("dataset", "dict")
        .output("model", "dict")
        .parameter("lr", Some(json!(0.01)))
        .build()
}

/// A step scoring a `model` on a `dataset`.
///
/// # Errors
///
/// See [`loader_step`].
pub fn evaluator_step() -> Result<Arc<dyn StepDefinition>, ConfigurationError> {
    step("evaluator")
        .source(Source::new("steps.training", "evaluator"))
        .source_code(EVALUATOR_SOURCE)
        .input("model", "dict")
        .input("dataset", "dict")
        .output("metrics", "dict")
        .build()
}

/// The `loader -> trainer -> evaluator` pipeline.
///
/// The entrypoint takes an optional `rows` argument and returns it.
#[must_use]
pub fn training_pipeline() -> Pipeline {
    Pipeline::new("training", |ctx, args| {
        let loader = loader_step()?;
        let trainer = trainer_step()?;
        let evaluator = evaluator_step()?;
        let rows = args.get("rows").cloned().unwrap_or(Value::Null);

        let dataset = ctx
            .call(&loader)
            .parameter("rows", rows.clone())
            .invoke()?
            .get("dataset")?;
        let model = ctx
            .call(&trainer)
            .input("dataset", dataset.clone())
            .invoke()?
            .get("model")?;
        ctx.call(&evaluator)
            .input("model", model)
            .input("dataset", dataset)
            .invoke()?;
        Ok(rows)
    })
    .with_source(Source::new("pipelines.training", "training"))
    .with_source_code(TRAINING_SOURCE)
    .with_parameter("rows", Some(json!(100)))
}

/// Compiles [`training_pipeline`] for a [`RecordingStack`].
///
/// # Errors
///
/// Returns any preparation or compilation error.
pub fn compiled_deployment() -> Result<PipelineDeployment, StepflowError> {
    let mut pipeline = training_pipeline();
    let (deployment, _) = Compiler::new().compile(&mut pipeline, &RecordingStack::new())?;
    Ok(deployment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_training_pipeline_graph() {
        let mut pipeline = training_pipeline();
        pipeline.prepare_if_possible().unwrap();

        let graph = pipeline.invocations().unwrap();
        assert_eq!(graph.ids(), vec!["loader", "trainer", "evaluator"]);
        assert_eq!(
            graph.get("evaluator").unwrap().upstream_steps.iter().cloned().collect::<Vec<_>>(),
            vec!["loader", "trainer"]
        );
    }

    #[test]
    fn test_compiled_deployment() {
        let deployment = compiled_deployment().unwrap();
        assert_eq!(deployment.steps().len(), 3);
        assert_eq!(deployment.step("loader").unwrap().config.parameters["rows"], json!(100));
    }
}
