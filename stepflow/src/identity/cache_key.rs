//! Per-step cache keys.
//!
//! A step's key covers its import path, its source code, the identities of its inputs, its
//! parameters, the keys of all upstream steps and its cache flag. Upstream
//! keys are folded in recursively, so any upstream change invalidates every
//! downstream key.

use crate::compiler::PipelineDeployment;
use crate::config::ConfigMap;
use crate::errors::CompilationError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Everything that determines the cache key of one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheKeyInputs {
    /// Import path of the step function.
    pub source: String,
    /// Raw source code of the step.
    pub source_code: String,
    /// Inputs from upstream steps: input name to `(invocation id, output name)`.
    pub input_artifacts: BTreeMap<String, (String, String)>,
    /// External inputs: input name to content hash.
    pub external_artifacts: BTreeMap<String, String>,
    /// Resolved parameter values.
    pub parameters: ConfigMap,
    /// Ids of all upstream invocations.
    pub upstream_steps: BTreeSet<String>,
    /// Whether caching is enabled for the step.
    pub cache_enabled: bool,
}

/// Computes and memoizes cache keys for the steps of one pipeline.
#[derive(Debug, Default)]
pub struct CacheKeyEngine {
    pipeline: String,
    steps: HashMap<String, CacheKeyInputs>,
    keys: HashMap<String, String>,
}

impl CacheKeyEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            steps: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    /// Creates an engine for every step of a deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the source code of a step is not available.
    pub fn from_deployment<'a>(
        deployment: &PipelineDeployment,
        step_source_code: impl Fn(&str) -> Option<&'a str>,
    ) -> Result<Self, CompilationError> {
        let pipeline = deployment.pipeline_configuration().name.clone();
        let mut engine = Self::new(pipeline.clone());

        for step in deployment.steps() {
            let id = step.config.name.clone();
            let source_code = step_source_code(&id).ok_or_else(|| {
                CompilationError::new(&pipeline, format!("no source code found for step '{id}'"))
            })?;

            engine.insert(
                id,
                CacheKeyInputs {
                    source: step.spec.source.import_path(),
                    source_code: source_code.to_string(),
                    input_artifacts: step
                        .spec
                        .inputs
                        .iter()
                        .map(|(name, input)| {
                            (name.clone(), (input.step_name.clone(), input.output_name.clone()))
                        })
                        .collect(),
                    external_artifacts: step
                        .config
                        .external_input_artifacts
                        .iter()
                        .map(|(name, artifact)| (name.clone(), artifact.content_hash.clone()))
                        .collect(),
                    parameters: step.config.parameters.clone(),
                    upstream_steps: step.spec.upstream_steps.iter().cloned().collect(),
                    cache_enabled: step.config.cache_enabled(),
                },
            );
        }

        Ok(engine)
    }

    /// Registers the inputs of one step, replacing previous inputs.
    pub fn insert(&mut self, id: impl Into<String>, inputs: CacheKeyInputs) {
        self.steps.insert(id.into(), inputs);
        self.keys.clear();
    }

    /// Returns the cache key of one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the step or one of its upstream steps is unknown,
    /// or if the steps form a cycle.
    pub fn cache_key(&mut self, id: &str) -> Result<String, CompilationError> {
        let mut visiting = HashSet::new();
        self.compute(id, &mut visiting)
    }

    /// Returns the cache keys of all registered steps.
    ///
    /// # Errors
    ///
    /// See [`CacheKeyEngine::cache_key`].
    pub fn cache_keys(&mut self) -> Result<BTreeMap<String, String>, CompilationError> {
        let mut ids: Vec<String> = self.steps.keys().cloned().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let key = self.cache_key(&id)?;
                Ok((id, key))
            })
            .collect()
    }

    fn compute(
        &mut self,
        id: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<String, CompilationError> {
        if let Some(key) = self.keys.get(id) {
            return Ok(key.clone());
        }
        if !visiting.insert(id.to_string()) {
            return Err(CompilationError::new(
                &self.pipeline,
                format!("cycle detected at step '{id}'"),
            ));
        }

        let inputs = self.steps.get(id).cloned().ok_or_else(|| {
            CompilationError::new(&self.pipeline, format!("unknown step '{id}'"))
        })?;

        let mut upstream_keys = BTreeMap::new();
        for upstream in &inputs.upstream_steps {
            let key = self.compute(upstream, visiting)?;
            upstream_keys.insert(upstream.clone(), key);
        }

        let mut hasher = Sha256::new();
        hasher.update(inputs.source.as_bytes());
        hasher.update(inputs.source_code.as_bytes());

        for (name, (producer, output)) in &inputs.input_artifacts {
            let producer_key = match upstream_keys.get(producer) {
                Some(key) => key.clone(),
                None => self.compute(producer, visiting)?,
            };
            hasher.update(name.as_bytes());
            hasher.update(producer_key.as_bytes());
            hasher.update(output.as_bytes());
        }

        for (name, content_hash) in &inputs.external_artifacts {
            hasher.update(name.as_bytes());
            hasher.update(content_hash.as_bytes());
        }

        let parameters = Value::Object(
            inputs
                .parameters
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );
        hasher.update(parameters.to_string().as_bytes());

        for key in upstream_keys.values() {
            hasher.update(key.as_bytes());
        }

        hasher.update(if inputs.cache_enabled { b"cache:1" } else { b"cache:0" });

        let key = hex::encode(hasher.finalize());
        visiting.remove(id);
        self.keys.insert(id.to_string(), key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(source: &str, upstream: &[&str]) -> CacheKeyInputs {
        CacheKeyInputs {
            source: "steps.training.step".to_string(),
            source_code: source.to_string(),
            input_artifacts: upstream
                .iter()
                .map(|id| (format!("{id}_in"), ((*id).to_string(), "output".to_string())))
                .collect(),
            upstream_steps: upstream.iter().map(|id| (*id).to_string()).collect(),
            cache_enabled: true,
            ..CacheKeyInputs::default()
        }
    }

    fn engine(loader_source: &str, other_source: &str) -> CacheKeyEngine {
        let mut engine = CacheKeyEngine::new("training");
        engine.insert("loader", step(loader_source, &[]));
        engine.insert("other", step(other_source, &[]));
        engine.insert("trainer", step("trainer", &["loader"]));
        engine.insert("evaluator", step("evaluator", &["trainer"]));
        engine
    }

    #[test]
    fn test_keys_are_deterministic() {
        let a = engine("loader", "other").cache_keys().unwrap();
        let b = engine("loader", "other").cache_keys().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_upstream_change_propagates() {
        let before = engine("loader", "other").cache_keys().unwrap();
        let after = engine("loader v2", "other").cache_keys().unwrap();

        assert_ne!(before["loader"], after["loader"]);
        assert_ne!(before["trainer"], after["trainer"]);
        assert_ne!(before["evaluator"], after["evaluator"]);
        assert_eq!(before["other"], after["other"]);
    }

    #[test]
    fn test_unrelated_change_is_isolated() {
        let before = engine("loader", "other").cache_keys().unwrap();
        let after = engine("loader", "other v2").cache_keys().unwrap();

        assert_eq!(before["trainer"], after["trainer"]);
        assert_eq!(before["evaluator"], after["evaluator"]);
    }

    #[test]
    fn test_import_path_distinguishes_identical_bodies() {
        let mut engine = CacheKeyEngine::new("training");
        engine.insert(
            "loader",
            CacheKeyInputs {
                source: "steps.data.loader".to_string(),
                ..step("", &[])
            },
        );
        engine.insert(
            "wipe_users",
            CacheKeyInputs {
                source: "steps.admin.wipe_users".to_string(),
                ..step("", &[])
            },
        );
        let empty = engine.cache_keys().unwrap();
        assert_ne!(empty["loader"], empty["wipe_users"]);

        engine.insert(
            "loader",
            CacheKeyInputs {
                source: "steps.data.loader".to_string(),
                ..step("fn body() {}", &[])
            },
        );
        engine.insert(
            "wipe_users",
            CacheKeyInputs {
                source: "steps.admin.wipe_users".to_string(),
                ..step("fn body() {}", &[])
            },
        );
        let shared = engine.cache_keys().unwrap();
        assert_ne!(shared["loader"], shared["wipe_users"]);
    }

    #[test]
    fn test_parameters_and_cache_flag_matter() {
        let mut engine = CacheKeyEngine::new("training");
        engine.insert("loader", step("loader", &[]));
        let base = engine.cache_key("loader").unwrap();

        let mut with_param = step("loader", &[]);
        with_param.parameters.insert("rows".to_string(), json!(10));
        engine.insert("loader", with_param);
        let parameterized = engine.cache_key("loader").unwrap();

        let mut disabled = step("loader", &[]);
        disabled.cache_enabled = false;
        engine.insert("loader", disabled);
        let uncached = engine.cache_key("loader").unwrap();

        assert_ne!(base, parameterized);
        assert_ne!(base, uncached);
    }

    #[test]
    fn test_unknown_upstream_fails() {
        let mut engine = CacheKeyEngine::new("training");
        engine.insert("trainer", step("trainer", &["loader"]));
        assert!(engine.cache_key("trainer").is_err());
    }

    #[test]
    fn test_cycle_fails() {
        let mut engine = CacheKeyEngine::new("training");
        engine.insert("a", step("a", &["b"]));
        engine.insert("b", step("b", &["a"]));
        assert!(engine.cache_key("a").is_err());
    }
}
