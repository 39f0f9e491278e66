//! Default materializers per output type.

use crate::config::Source;
use std::collections::BTreeMap;

/// Module that hosts the built-in materializers.
pub const BUILTIN_MATERIALIZER_MODULE: &str = "stepflow.materializers.built_in_materializer";

/// Maps output type names to their default materializer.
#[derive(Debug, Clone)]
pub struct MaterializerRegistry {
    defaults: BTreeMap<String, Source>,
}

impl Default for MaterializerRegistry {
    fn default() -> Self {
        let builtin = Source::internal(BUILTIN_MATERIALIZER_MODULE, "BuiltInMaterializer");
        let container = Source::internal(BUILTIN_MATERIALIZER_MODULE, "BuiltInContainerMaterializer");
        let bytes = Source::internal(BUILTIN_MATERIALIZER_MODULE, "BytesMaterializer");

        let mut defaults = BTreeMap::new();
        for type_name in ["bool", "float", "int", "str"] {
            defaults.insert(type_name.to_string(), builtin.clone());
        }
        for type_name in ["dict", "list", "set", "tuple"] {
            defaults.insert(type_name.to_string(), container.clone());
        }
        defaults.insert("bytes".to_string(), bytes);

        Self { defaults }
    }
}

impl MaterializerRegistry {
    /// Creates a registry with the built-in materializers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry without any materializers.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            defaults: BTreeMap::new(),
        }
    }

    /// Registers the default materializer for a type, replacing any previous one.
    pub fn register(&mut self, type_name: impl Into<String>, source: Source) {
        self.defaults.insert(type_name.into(), source);
    }

    /// Returns the default materializer for a type.
    #[must_use]
    pub fn default_for(&self, type_name: &str) -> Option<&Source> {
        self.defaults.get(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_defaults() {
        let registry = MaterializerRegistry::new();
        let source = registry.default_for("int").unwrap();
        assert!(source.internal);
        assert_eq!(source.attribute, "BuiltInMaterializer");
        assert!(registry.default_for("pandas.DataFrame").is_none());
    }

    #[test]
    fn test_register_custom() {
        let mut registry = MaterializerRegistry::empty();
        registry.register("pandas.DataFrame", Source::new("materializers.pandas", "PandasMaterializer"));
        assert!(!registry.default_for("pandas.DataFrame").unwrap().internal);
    }
}
