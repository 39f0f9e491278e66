//! Settings key validation.
//!
//! Settings keys are either general keys (`docker`, `resources`) or keys of
//! the form `<component_type>.<flavor>` that target one stack component.

use crate::errors::ConfigurationError;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Settings keys that apply independently of the stack.
pub const GENERAL_SETTINGS_KEYS: [&str; 2] = ["docker", "resources"];

/// Stack component types that accept settings.
pub const STACK_COMPONENT_TYPES: [&str; 12] = [
    "alerter",
    "annotator",
    "artifact_store",
    "container_registry",
    "data_validator",
    "experiment_tracker",
    "feature_store",
    "image_builder",
    "model_deployer",
    "model_registry",
    "orchestrator",
    "step_operator",
];

static SETTING_KEY: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^([a-z_]+)\.([a-z0-9_\-]+)$"));

/// Splits a stack component key into `(component_type, flavor)`.
///
/// Returns `None` for general keys and malformed keys.
#[must_use]
pub fn split_setting_key(key: &str) -> Option<(&str, &str)> {
    let pattern = SETTING_KEY.as_ref().ok()?;
    let captures = pattern.captures(key)?;
    let component_type = captures.get(1)?.as_str();
    let flavor = captures.get(2)?.as_str();
    STACK_COMPONENT_TYPES
        .contains(&component_type)
        .then_some((component_type, flavor))
}

/// Validates the format of a single settings key.
///
/// # Errors
///
/// Returns the reason the key is invalid.
pub fn validate_setting_key(key: &str) -> Result<(), String> {
    if GENERAL_SETTINGS_KEYS.contains(&key) || split_setting_key(key).is_some() {
        return Ok(());
    }
    Err(format!(
        "expected one of {GENERAL_SETTINGS_KEYS:?} or `<component_type>.<flavor>` with a component type in {STACK_COMPONENT_TYPES:?}"
    ))
}

/// Validates settings keys for a pipeline.
///
/// When `stack_keys` is given, stack component keys must also be offered by
/// that stack.
///
/// # Errors
///
/// Returns `UnknownSettingKey` for the first invalid key.
pub fn validate_setting_keys<'a>(
    pipeline: &str,
    keys: impl IntoIterator<Item = &'a String>,
    stack_keys: Option<&BTreeSet<String>>,
) -> Result<(), ConfigurationError> {
    for key in keys {
        validate_setting_key(key).map_err(|reason| ConfigurationError::UnknownSettingKey {
            pipeline: pipeline.to_string(),
            key: key.clone(),
            reason,
        })?;

        if let Some(stack_keys) = stack_keys {
            if split_setting_key(key).is_some() && !stack_keys.contains(key) {
                return Err(ConfigurationError::UnknownSettingKey {
                    pipeline: pipeline.to_string(),
                    key: key.clone(),
                    reason: "no component of the target stack accepts these settings".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_keys_are_valid() {
        assert!(validate_setting_key("docker").is_ok());
        assert!(validate_setting_key("resources").is_ok());
    }

    #[test]
    fn test_component_keys() {
        assert_eq!(
            split_setting_key("orchestrator.kubernetes"),
            Some(("orchestrator", "kubernetes"))
        );
        assert!(validate_setting_key("step_operator.sagemaker").is_ok());
        assert!(split_setting_key("docker").is_none());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(validate_setting_key("dockr").is_err());
        assert!(validate_setting_key("spaceship.warp").is_err());
        assert!(validate_setting_key("orchestrator").is_err());
        assert!(validate_setting_key("Orchestrator.Local").is_err());
    }

    #[test]
    fn test_validate_against_stack_keys() {
        let stack_keys: BTreeSet<String> = ["orchestrator.local".to_string()].into();
        let ok = ["docker".to_string(), "orchestrator.local".to_string()];
        assert!(validate_setting_keys("p", ok.iter(), Some(&stack_keys)).is_ok());

        let foreign = ["orchestrator.kubernetes".to_string()];
        let err = validate_setting_keys("p", foreign.iter(), Some(&stack_keys)).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownSettingKey { ref key, .. } if key == "orchestrator.kubernetes"));

        assert!(validate_setting_keys("p", foreign.iter(), None).is_ok());
    }
}
