use serde_json::Value;

/// Recursively merges `overlay` onto `base`, preferring `overlay`'s leaf values but
/// keeping every `base` key that `overlay` does not mention. Mirrors the deep-merge
/// behaviour required when a partial YAML file is layered over built-in defaults.
pub fn merge_json(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let merged_value = match merged.get(key) {
                    Some(base_value) => merge_json(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        // Non-object overlay values (including arrays) replace the base wholesale;
        // arrays are not element-wise merged.
        (_, overlay_value) => overlay_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_leaf_wins_but_siblings_survive() {
        let base = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let overlay = json!({"b": {"c": 99}});
        let merged = merge_json(&base, &overlay);
        assert_eq!(merged, json!({"a": 1, "b": {"c": 99, "d": 3}}));
    }

    #[test]
    fn arrays_replace_rather_than_concatenate() {
        let base = json!({"list": [1, 2, 3]});
        let overlay = json!({"list": [9]});
        let merged = merge_json(&base, &overlay);
        assert_eq!(merged, json!({"list": [9]}));
    }

    #[test]
    fn empty_overlay_is_identity() {
        let base = json!({"a": {"b": 1}});
        let merged = merge_json(&base, &json!({}));
        assert_eq!(merged, base);
    }
}
