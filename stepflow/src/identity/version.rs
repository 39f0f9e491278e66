//! Version hashing.

use crate::compiler::PipelineSpec;
use crate::errors::{CompilationError, StepflowError};
use md5::{Digest, Md5};

/// First spec version whose hash includes the pipeline source code.
const PIPELINE_SOURCE_HASH_VERSION: (u32, u32) = (0, 4);

/// Returns true if `version` (`major.minor`) is at least `minimum`.
///
/// Unparseable versions compare as `0.0`.
#[must_use]
pub fn spec_version_at_least(version: &str, minimum: (u32, u32)) -> bool {
    let mut parts = version.split('.').map(|part| part.trim().parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= minimum
}

/// Computes the version hash of a compiled pipeline.
///
/// The digest covers the spec serialized with sources as strings, the
/// pipeline source code for newer spec versions, and each step's source code
/// in spec order. `step_source_code` is looked up by invocation id.
///
/// # Errors
///
/// Returns a compilation error if a step in the spec has no source code
/// available, which means spec and graph are out of sync.
pub fn compute_version_hash<'a>(
    spec: &PipelineSpec,
    pipeline_name: &str,
    pipeline_source_code: &str,
    step_source_code: impl Fn(&str) -> Option<&'a str>,
) -> Result<String, StepflowError> {
    let mut hasher = Md5::new();
    hasher.update(spec.json_with_string_sources().as_bytes());

    if spec_version_at_least(&spec.version, PIPELINE_SOURCE_HASH_VERSION) {
        hasher.update(pipeline_source_code.as_bytes());
    }

    for step in &spec.steps {
        let source_code = step_source_code(&step.pipeline_parameter_name).ok_or_else(|| {
            CompilationError::new(
                pipeline_name,
                format!(
                    "no source code found for step '{}'",
                    step.pipeline_parameter_name
                ),
            )
        })?;
        hasher.update(source_code.as_bytes());
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::StepSpec;
    use crate::config::Source;
    use std::collections::BTreeMap;

    fn spec(version: &str) -> PipelineSpec {
        PipelineSpec {
            version: version.to_string(),
            source: Some(Source::new("pipelines", "training")),
            parameters: BTreeMap::new(),
            steps: vec![StepSpec {
                source: Source::new("steps", "loader"),
                upstream_steps: Vec::new(),
                inputs: BTreeMap::new(),
                pipeline_parameter_name: "loader".to_string(),
            }],
        }
    }

    fn codes(id: &str) -> Option<&'static str> {
        (id == "loader").then_some("fn loader() {}")
    }

    #[test]
    fn test_version_comparison() {
        assert!(spec_version_at_least("0.4", (0, 4)));
        assert!(spec_version_at_least("1.0", (0, 4)));
        assert!(!spec_version_at_least("0.3", (0, 4)));
        assert!(!spec_version_at_least("garbage", (0, 4)));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = compute_version_hash(&spec("0.4"), "training", "fn training() {}", codes).unwrap();
        let b = compute_version_hash(&spec("0.4"), "training", "fn training() {}", codes).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_pipeline_source_only_hashed_for_new_specs() {
        let old_a = compute_version_hash(&spec("0.3"), "training", "a", codes).unwrap();
        let old_b = compute_version_hash(&spec("0.3"), "training", "b", codes).unwrap();
        assert_eq!(old_a, old_b);

        let new_a = compute_version_hash(&spec("0.4"), "training", "a", codes).unwrap();
        let new_b = compute_version_hash(&spec("0.4"), "training", "b", codes).unwrap();
        assert_ne!(new_a, new_b);
    }

    #[test]
    fn test_missing_step_source_is_internal_error() {
        let err = compute_version_hash(&spec("0.4"), "training", "", |_| None).unwrap_err();
        assert!(!err.is_user_error());
    }
}
