//! Run configuration templates.

use super::Pipeline;
use crate::config::GENERAL_SETTINGS_KEYS;
use crate::errors::StepflowError;
use crate::stack::Stack;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::info;

const TEMPLATE_HEADER: &str = "# Run configuration template. Uncomment the options you want to set.\n";

impl Pipeline {
    /// Returns a run configuration document with every option left empty.
    ///
    /// Settings list the general keys plus the keys `stack` accepts. Each
    /// step lists its parameters with their defaults and its outputs.
    ///
    /// # Errors
    ///
    /// Returns `NotPrepared` if the pipeline cannot be prepared without
    /// arguments, or any preparation error.
    pub fn run_configuration_template(&mut self, stack: &dyn Stack) -> Result<Value, StepflowError> {
        self.prepare_if_possible()?;

        let mut setting_keys: BTreeSet<String> =
            GENERAL_SETTINGS_KEYS.iter().map(|key| (*key).to_string()).collect();
        setting_keys.extend(stack.setting_keys());
        let settings: Map<String, Value> = setting_keys
            .into_iter()
            .map(|key| (key, json!({})))
            .collect();

        let mut steps = Map::new();
        for invocation in self.invocations().into_iter().flat_map(|graph| graph.iter()) {
            let signature = invocation.step.signature();
            let parameters: Map<String, Value> = signature
                .parameters
                .iter()
                .map(|(name, default)| (name.clone(), default.clone().unwrap_or(Value::Null)))
                .collect();
            let outputs: Map<String, Value> = signature
                .outputs
                .keys()
                .map(|name| (name.clone(), json!({ "materializer_source": null })))
                .collect();
            steps.insert(
                invocation.id.clone(),
                json!({
                    "enable_cache": null,
                    "parameters": parameters,
                    "settings": settings,
                    "extra": {},
                    "outputs": outputs,
                }),
            );
        }

        Ok(json!({
            "run_name": null,
            "enable_cache": null,
            "enable_artifact_metadata": null,
            "enable_artifact_visualization": null,
            "schedule": null,
            "build": null,
            "settings": settings,
            "extra": {},
            "steps": steps,
        }))
    }

    /// Writes [`Pipeline::run_configuration_template`] to `path` as YAML with
    /// every line commented out.
    ///
    /// # Errors
    ///
    /// Returns preparation, serialization and IO errors.
    pub fn write_run_configuration_template(
        &mut self,
        path: &Path,
        stack: &dyn Stack,
    ) -> Result<(), StepflowError> {
        let template = self.run_configuration_template(stack)?;
        let yaml = serde_yaml::to_string(&template)
            .map_err(|err| StepflowError::Serialization(err.to_string()))?;

        let mut document = String::from(TEMPLATE_HEADER);
        for line in yaml.lines() {
            document.push_str("# ");
            document.push_str(line);
            document.push('\n');
        }
        fs::write(path, document)?;

        info!(pipeline = %self.name(), path = %path.display(), "Wrote run configuration template");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PipelineRunConfiguration;
    use crate::testing::{fixtures, RecordingStack};
    use serde_json::json;

    #[test]
    fn test_template_lists_steps_and_settings() {
        let mut pipeline = fixtures::training_pipeline();
        let template = pipeline
            .run_configuration_template(&RecordingStack::new())
            .unwrap();

        assert!(template["settings"].get("docker").is_some());
        assert!(template["settings"].get("orchestrator.local").is_some());
        assert_eq!(template["steps"]["trainer"]["parameters"]["lr"], json!(0.01));
        assert!(template["steps"]["evaluator"]["outputs"].get("metrics").is_some());
    }

    #[test]
    fn test_written_template_is_commented_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        let mut pipeline = fixtures::training_pipeline();

        pipeline
            .write_run_configuration_template(&path, &RecordingStack::new())
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.lines().all(|line| line.starts_with('#')));

        let uncommented: String = written
            .lines()
            .skip(1)
            .map(|line| format!("{}\n", line.trim_start_matches("# ")))
            .collect();
        let parsed = PipelineRunConfiguration::from_yaml_str(&uncommented, "template").unwrap();
        assert!(parsed.steps.contains_key("loader"));
    }
}
