//! Run options overlaid on a shared pipeline definition.

use crate::config::PipelineRunConfiguration;
use std::path::PathBuf;

/// Options that apply to runs of one pipeline value.
///
/// Options are layered: `Pipeline::with_options` combines the existing
/// options with new ones instead of copying the pipeline definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// YAML run configuration file.
    pub config_path: Option<PathBuf>,
    /// In-code run configuration; overrides the file.
    pub run_configuration: PipelineRunConfiguration,
    /// Run without registering the pipeline.
    pub unlisted: bool,
    /// Always create a new build instead of reusing one.
    pub prevent_build_reuse: bool,
}

impl RunOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the YAML configuration file.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Sets the in-code run configuration.
    #[must_use]
    pub fn with_run_configuration(mut self, run_configuration: PipelineRunConfiguration) -> Self {
        self.run_configuration = run_configuration;
        self
    }

    /// Sets whether the run skips pipeline registration.
    #[must_use]
    pub const fn with_unlisted(mut self, unlisted: bool) -> Self {
        self.unlisted = unlisted;
        self
    }

    /// Sets whether build reuse is disabled.
    #[must_use]
    pub const fn with_prevent_build_reuse(mut self, prevent: bool) -> Self {
        self.prevent_build_reuse = prevent;
        self
    }

    /// Returns these options with `other` layered on top.
    #[must_use]
    pub fn layered(self, other: Self) -> Self {
        Self {
            config_path: other.config_path.or(self.config_path),
            run_configuration: self.run_configuration.layered(other.run_configuration),
            unlisted: self.unlisted || other.unlisted,
            prevent_build_reuse: self.prevent_build_reuse || other.prevent_build_reuse,
        }
    }
}
