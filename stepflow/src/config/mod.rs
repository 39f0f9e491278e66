//! Layered configuration model.
//!
//! This module provides:
//! - Pipeline and step configurations with merge/replace semantics
//! - Run configurations loaded from YAML and in-code overrides
//! - Portable source references for hooks and materializers
//! - Settings key validation
//! - Environment-level controls

mod environment;
mod merge;
mod pipeline_configuration;
mod run_configuration;
mod schedule;
mod settings;
mod source;
mod step_configuration;

pub use environment::{
    parse_bool, EnvironmentConfig, ENV_DEFAULT_USER_NAME, ENV_DEFAULT_USER_PASSWORD,
    ENV_DEFAULT_WORKSPACE_NAME, ENV_LOGGING_FORMAT, ENV_LOGGING_VERBOSITY,
    ENV_PREVENT_PIPELINE_EXECUTION, ENV_SKIP_PIPELINE_REGISTRATION,
};
pub use merge::{deep_merge, merge_maps, ConfigMap};
pub use pipeline_configuration::{PipelineConfiguration, PipelineConfigurationUpdate};
pub use run_configuration::PipelineRunConfiguration;
pub use schedule::Schedule;
pub use settings::{
    split_setting_key, validate_setting_key, validate_setting_keys, GENERAL_SETTINGS_KEYS,
    STACK_COMPONENT_TYPES,
};
pub use source::{resolve_hook, HookContext, HookSpecification, Source};
pub use step_configuration::{
    ArtifactConfiguration, ArtifactConfigurationUpdate, ExternalArtifactConfiguration,
    StepConfiguration, StepConfigurationUpdate,
};
