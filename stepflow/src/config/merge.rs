//! Deep-union helpers shared by all configuration layers.

use serde_json::Value;
use std::collections::BTreeMap;

/// A mapping of configuration keys to structured values.
///
/// Ordered so that serialized configurations (and therefore version hashes)
/// do not depend on insertion order.
pub type ConfigMap = BTreeMap<String, Value>;

/// Merges `update` into `base`.
///
/// Objects are unioned recursively; any other value in `update` overwrites
/// the value in `base`.
pub fn deep_merge(base: &mut Value, update: Value) {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, update) => *base = update,
    }
}

/// Deep-merges every entry of `update` into `base`.
pub fn merge_maps(base: &mut ConfigMap, update: ConfigMap) {
    for (key, value) in update {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

/// Applies an optional map update, either merging or replacing.
pub(crate) fn apply_map(base: &mut ConfigMap, update: Option<&ConfigMap>, merge: bool) {
    if let Some(update) = update {
        if merge {
            merge_maps(base, update.clone());
        } else {
            base.clone_from(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut base = json!({"docker": {"image": "a", "env": {"X": "1"}}});
        deep_merge(&mut base, json!({"docker": {"env": {"Y": "2"}}}));

        assert_eq!(
            base,
            json!({"docker": {"image": "a", "env": {"X": "1", "Y": "2"}}})
        );
    }

    #[test]
    fn test_deep_merge_scalar_overwrites() {
        let mut base = json!({"resources": {"cpu_count": 2}});
        deep_merge(&mut base, json!({"resources": {"cpu_count": 4}}));
        assert_eq!(base, json!({"resources": {"cpu_count": 4}}));

        let mut base = json!({"a": [1, 2]});
        deep_merge(&mut base, json!({"a": [3]}));
        assert_eq!(base, json!({"a": [3]}));
    }

    #[test]
    fn test_apply_map_modes() {
        let mut base: ConfigMap = [("a".to_string(), json!(1))].into_iter().collect();
        let update: ConfigMap = [("b".to_string(), json!(2))].into_iter().collect();

        let mut merged = base.clone();
        apply_map(&mut merged, Some(&update), true);
        assert_eq!(merged.len(), 2);

        apply_map(&mut base, Some(&update), false);
        assert_eq!(base, update);

        apply_map(&mut base, None, false);
        assert_eq!(base, update);
    }
}
