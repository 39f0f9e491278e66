//! Portable source references and hook resolution.

use crate::errors::ConfigurationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static SOURCE_PATH: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+$")
});

/// A location-independent reference to a function or type.
///
/// Sources are what gets stored in configurations and deployments instead of
/// live objects, so everything that references code stays serializable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Source {
    /// Dotted module path.
    pub module: String,
    /// Attribute inside the module.
    pub attribute: String,
    /// Whether the source belongs to stepflow itself.
    #[serde(default)]
    pub internal: bool,
}

impl Source {
    /// Creates a user source.
    #[must_use]
    pub fn new(module: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            attribute: attribute.into(),
            internal: false,
        }
    }

    /// Creates a source that belongs to stepflow itself.
    #[must_use]
    pub fn internal(module: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            internal: true,
            ..Self::new(module, attribute)
        }
    }

    /// Parses a dotted path such as `hooks.alerts.notify`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the path is not a dotted
    /// identifier path with at least two segments.
    pub fn from_path(path: &str) -> Result<Self, String> {
        let valid = SOURCE_PATH
            .as_ref()
            .map_err(|e| format!("source path pattern failed to compile: {e}"))?
            .is_match(path);
        if !valid {
            return Err(format!(
                "'{path}' is not a valid source path of the form `module.attribute`"
            ));
        }

        // The regex guarantees at least one dot.
        let (module, attribute) = path.rsplit_once('.').unwrap_or(("", path));
        Ok(Self::new(module, attribute))
    }

    /// Returns the dotted import path.
    #[must_use]
    pub fn import_path(&self) -> String {
        format!("{}.{}", self.module, self.attribute)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.attribute)
    }
}

/// Context passed to failure and success hooks at execution time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookContext {
    /// The pipeline name.
    pub pipeline: String,
    /// The step invocation id, if the hook runs for a step.
    pub step: Option<String>,
    /// The error message for failure hooks.
    pub error: Option<String>,
}

/// A hook as the user specified it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookSpecification {
    /// A function given in code; `type_path` is its Rust path.
    Inline {
        /// Fully qualified Rust path of the function item.
        type_path: String,
    },
    /// An already resolved source.
    Source(Source),
    /// A dotted source path.
    Path(String),
}

impl HookSpecification {
    /// Captures a hook function.
    ///
    /// Only named function items can be resolved later; closures have no
    /// stable path.
    pub fn from_fn<F>(_hook: F) -> Self
    where
        F: Fn(&HookContext) + Send + Sync + 'static,
    {
        Self::Inline {
            type_path: std::any::type_name::<F>().to_string(),
        }
    }

    /// Creates a hook specification from a dotted path.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}

impl From<Source> for HookSpecification {
    fn from(source: Source) -> Self {
        Self::Source(source)
    }
}

impl From<&str> for HookSpecification {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

/// Resolves a hook specification into a portable source.
///
/// # Errors
///
/// Returns `InvalidHook` naming `owner` and `field` if the specification
/// cannot be turned into a source.
pub fn resolve_hook(
    spec: &HookSpecification,
    owner: &str,
    field: &str,
) -> Result<Source, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidHook {
        owner: owner.to_string(),
        field: field.to_string(),
        reason,
    };

    match spec {
        HookSpecification::Source(source) => Ok(source.clone()),
        HookSpecification::Path(path) => Source::from_path(path).map_err(invalid),
        HookSpecification::Inline { type_path } => {
            if type_path.contains("{{closure}}") || type_path.contains('<') {
                return Err(invalid(format!(
                    "'{type_path}' is not a named function; closures cannot be stored as hooks"
                )));
            }
            Source::from_path(&type_path.replace("::", ".")).map_err(invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify(_ctx: &HookContext) {}

    #[test]
    fn test_source_from_path() {
        let source = Source::from_path("hooks.alerts.notify").unwrap();
        assert_eq!(source.module, "hooks.alerts");
        assert_eq!(source.attribute, "notify");
        assert_eq!(source.import_path(), "hooks.alerts.notify");
        assert!(!source.internal);
    }

    #[test]
    fn test_source_from_invalid_path() {
        assert!(Source::from_path("notify").is_err());
        assert!(Source::from_path("hooks..notify").is_err());
        assert!(Source::from_path("hooks.1notify").is_err());
        assert!(Source::from_path("").is_err());
    }

    #[test]
    fn test_resolve_named_function_hook() {
        let spec = HookSpecification::from_fn(notify);
        let source = resolve_hook(&spec, "training", "on_failure").unwrap();

        assert_eq!(source.attribute, "notify");
        assert!(source.module.ends_with("config.source.tests"));
    }

    #[test]
    fn test_resolve_closure_hook_fails() {
        let spec = HookSpecification::from_fn(|_ctx: &HookContext| {});
        let err = resolve_hook(&spec, "training", "on_success").unwrap_err();

        assert!(err.to_string().contains("training"));
        assert!(err.to_string().contains("on_success"));
    }

    #[test]
    fn test_resolve_path_and_source_hooks() {
        let from_path = resolve_hook(&"alerts.notify".into(), "p", "on_failure").unwrap();
        let from_source =
            resolve_hook(&Source::new("alerts", "notify").into(), "p", "on_failure").unwrap();
        assert_eq!(from_path, from_source);
    }
}
