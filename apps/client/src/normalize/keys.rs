//! snake_case → camelCase key conversion over arbitrary JSON trees.
//!
//! Rule per key: leading underscores are kept verbatim; after them, every `_`
//! directly followed by an ASCII lowercase letter is dropped and the letter is
//! upper-cased. Anything else (digits, non-ASCII, doubled or trailing
//! underscores) is copied unchanged, so the conversion is idempotent:
//!
//! - `target_account_name` → `targetAccountName`
//! - `_private_key` → `_privateKey`
//! - `__init__` → `__init__`
//! - `a__b` → `a_B`
//! - `line_1` → `line_1`

use serde_json::{Map, Value};

pub fn snake_to_camel(key: &str) -> String {
    let body = key.trim_start_matches('_');
    let prefix = &key[..key.len() - body.len()];

    let mut out = String::with_capacity(key.len());
    out.push_str(prefix);

    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '_' {
            if let Some(next) = chars.peek().copied() {
                if next.is_ascii_lowercase() {
                    out.push(next.to_ascii_uppercase());
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

/// Deep copy of `value` with every object key converted. Arrays recurse,
/// scalars are cloned as-is.
pub fn camelize_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(camelize_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(camelize_keys).collect()),
        scalar => scalar.clone(),
    }
}

/// Converts one object. When a converted key collides with a key that was
/// already camelCase, the camelCase entry wins regardless of iteration order.
pub fn camelize_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let camel = snake_to_camel(key);
        let converted = camel != *key;
        if converted && out.contains_key(&camel) {
            continue;
        }
        out.insert(camel, camelize_keys(value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{quickcheck, TestResult};
    use serde_json::json;

    #[test]
    fn test_plain_snake_case() {
        assert_eq!(snake_to_camel("target_account_name"), "targetAccountName");
        assert_eq!(snake_to_camel("buying_signals"), "buyingSignals");
    }

    #[test]
    fn test_camel_case_is_untouched() {
        assert_eq!(snake_to_camel("targetAccountName"), "targetAccountName");
        assert_eq!(snake_to_camel("id"), "id");
        assert_eq!(snake_to_camel(""), "");
    }

    #[test]
    fn test_leading_and_trailing_underscores() {
        assert_eq!(snake_to_camel("_private_key"), "_privateKey");
        assert_eq!(snake_to_camel("__init__"), "__init__");
        assert_eq!(snake_to_camel("trailing_"), "trailing_");
        assert_eq!(snake_to_camel("___"), "___");
    }

    #[test]
    fn test_adversarial_keys() {
        assert_eq!(snake_to_camel("a__b"), "a_B");
        assert_eq!(snake_to_camel("line_1"), "line_1");
        assert_eq!(snake_to_camel("1st_place"), "1stPlace");
        assert_eq!(snake_to_camel("caf\u{e9}_cr\u{e8}me"), "caf\u{e9}Cr\u{e8}me");
        assert_eq!(snake_to_camel("na\u{ef}ve_\u{e9}t\u{e9}"), "na\u{ef}ve_\u{e9}t\u{e9}");
        assert_eq!(snake_to_camel("already_Upper"), "already_Upper");
    }

    #[test]
    fn test_nested_objects_inside_arrays() {
        let input = json!({
            "buying_signals": [
                {"detection_method": "job posts", "keywords": ["sdr_hiring"]},
                {"detection_method": "funding", "extra_info": {"round_type": "B"}}
            ],
            "company_size": {"employees": "50-200"},
            "empty_map": {}
        });
        let expected = json!({
            "buyingSignals": [
                {"detectionMethod": "job posts", "keywords": ["sdr_hiring"]},
                {"detectionMethod": "funding", "extraInfo": {"roundType": "B"}}
            ],
            "companySize": {"employees": "50-200"},
            "emptyMap": {}
        });
        assert_eq!(camelize_keys(&input), expected);
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(camelize_keys(&json!(3)), json!(3));
        assert_eq!(camelize_keys(&json!("snake_value")), json!("snake_value"));
        assert_eq!(camelize_keys(&json!(null)), json!(null));
        assert_eq!(camelize_keys(&json!([])), json!([]));
    }

    #[test]
    fn test_collision_prefers_existing_camel_key() {
        let input = json!({"buying_signals": "old", "buyingSignals": "new"});
        assert_eq!(camelize_keys(&input), json!({"buyingSignals": "new"}));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let input = json!({"outer_key": {"inner_key": [1, 2]}});
        let before = input.clone();
        let _ = camelize_keys(&input);
        assert_eq!(input, before);
    }

    /// Builds a tree of depth `depth` with (at most four of) the given keys at
    /// every level.
    fn nest(keys: &[String], depth: usize) -> Value {
        let keys = &keys[..keys.len().min(4)];
        let mut value = json!("leaf");
        for _ in 0..depth {
            let mut map = Map::new();
            for key in keys {
                map.insert(key.clone(), value.clone());
            }
            value = json!([Value::Object(map)]);
        }
        value
    }

    quickcheck! {
        fn prop_key_conversion_is_idempotent(key: String) -> bool {
            let once = snake_to_camel(&key);
            snake_to_camel(&once) == once
        }

        fn prop_tree_conversion_is_idempotent(keys: Vec<String>, depth: u8) -> bool {
            let tree = nest(&keys, (depth % 4) as usize);
            let once = camelize_keys(&tree);
            camelize_keys(&once) == once
        }

        fn prop_conversion_is_depth_invariant(keys: Vec<String>, depth: u8) -> TestResult {
            if keys.is_empty() {
                return TestResult::discard();
            }
            let depth = (depth % 4) as usize + 1;
            // Every level of the converted tree carries the same key set as the top.
            let converted = camelize_keys(&nest(&keys, depth));
            let top: Map<String, Value> = keys
                .iter()
                .take(4)
                .map(|k| (k.clone(), Value::Null))
                .collect();
            let expected: Vec<String> = camelize_map(&top).keys().cloned().collect();

            let mut level = &converted;
            for _ in 0..depth {
                let Some(map) = level.get(0).and_then(Value::as_object) else {
                    return TestResult::failed();
                };
                if map.keys().cloned().collect::<Vec<_>>() != expected {
                    return TestResult::failed();
                }
                match map.values().next() {
                    Some(next) => level = next,
                    None => return TestResult::failed(),
                }
            }
            TestResult::passed()
        }

        fn prop_leading_underscores_survive(key: String) -> bool {
            let leading = key.len() - key.trim_start_matches('_').len();
            let converted = snake_to_camel(&key);
            converted.len() - converted.trim_start_matches('_').len() == leading
        }
    }
}
