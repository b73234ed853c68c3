use serde_json::Value;
use std::collections::BTreeMap;

const ENV_PREFIX: &str = "GUARDRAILS_";

/// Applies `GUARDRAILS_FOO_BAR_BAZ`-style environment overrides onto a flattened
/// dotted-path config tree, then re-nests the result. Values are parsed as boolean,
/// then integer, then string, in that order, per the external-interface contract.
pub fn apply_env_overrides(config: Value) -> Value {
    apply_env_overrides_from(config, std::env::vars())
}

pub fn apply_env_overrides_from(
    config: Value,
    env: impl IntoIterator<Item = (String, String)>,
) -> Value {
    let mut flat = crate::model::flatten(&config);

    for (key, raw_value) in env {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let dotted = suffix.to_lowercase().replace('_', ".");
        if let Some(matched_key) = resolve_key(&flat, &dotted) {
            flat.insert(matched_key, parse_env_value(&raw_value));
        }
    }

    nest(flat)
}

/// `dotted` arrives with every underscore turned into a dot, which is ambiguous for
/// keys whose segments themselves contain underscores (e.g. `circuit_breaker.failure_threshold`
/// becomes `circuit.breaker.failure.threshold`). Resolve by comparing against the
/// known flattened keys with underscores stripped on both sides.
fn resolve_key(flat: &BTreeMap<String, Value>, dotted_with_underscores_as_dots: &str) -> Option<String> {
    let candidate_normalized = dotted_with_underscores_as_dots.replace('.', "");
    flat.keys()
        .find(|existing_key| existing_key.replace(['.', '_'], "") == candidate_normalized)
        .cloned()
}

fn parse_env_value(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => return Value::Bool(true),
        "false" | "no" | "off" | "0" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}

fn nest(flat: BTreeMap<String, Value>) -> Value {
    let mut root = Value::Object(Default::default());
    for (key, value) in flat {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value);
    }
    root
}

fn insert_path(node: &mut Value, parts: &[&str], value: Value) {
    let Value::Object(map) = node else {
        return;
    };
    if parts.len() == 1 {
        map.insert(parts[0].to_string(), value);
        return;
    }
    let entry = map
        .entry(parts[0].to_string())
        .or_insert_with(|| Value::Object(Default::default()));
    insert_path(entry, &parts[1..], value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boolean_parsed_before_integer_or_string() {
        let base = json!({"circuit_breaker": {"failure_threshold": 3}});
        let env = vec![("GUARDRAILS_CIRCUIT_BREAKER_FAILURE_THRESHOLD".to_string(), "7".to_string())];
        let merged = apply_env_overrides_from(base, env);
        assert_eq!(merged["circuit_breaker"]["failure_threshold"], json!(7));
    }

    #[test]
    fn yes_no_parse_as_bool() {
        let base = json!({"policy": {"enabled": true}});
        let env = vec![("GUARDRAILS_POLICY_ENABLED".to_string(), "no".to_string())];
        let merged = apply_env_overrides_from(base, env);
        assert_eq!(merged["policy"]["enabled"], json!(false));
    }

    #[test]
    fn unrelated_env_vars_are_ignored() {
        let base = json!({"a": 1});
        let env = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let merged = apply_env_overrides_from(base.clone(), env);
        assert_eq!(merged, base);
    }
}
