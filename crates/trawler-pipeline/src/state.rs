//! The state bag shared by the steps of one execution.

use serde_json::{Map, Value};

/// String-keyed values accumulated across steps.
///
/// Seeded from the execution input; each step's delta is merged in after the
/// step finishes. Keys are only ever added or overwritten.
pub type StateBag = Map<String, Value>;

/// Merge `delta` into `state`, overwriting keys present in both.
pub fn merge(state: &mut StateBag, delta: StateBag) {
    for (key, value) in delta {
        state.insert(key, value);
    }
}

/// Read a non-negative integer, accepting integral floats and numeric strings.
pub fn get_u64(state: &StateBag, key: &str) -> Option<u64> {
    match state.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn get_bool(state: &StateBag, key: &str) -> Option<bool> {
    state.get(key).and_then(Value::as_bool)
}

pub fn get_str<'a>(state: &'a StateBag, key: &str) -> Option<&'a str> {
    state.get(key).and_then(Value::as_str)
}

/// Build a state bag from a JSON value, or an empty one when it is not an object.
pub fn from_value(value: Value) -> StateBag {
    match value {
        Value::Object(map) => map,
        _ => StateBag::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_and_keeps() {
        let mut state = from_value(json!({"a": 1, "b": 2}));
        merge(&mut state, from_value(json!({"b": 3, "c": 4})));
        assert_eq!(Value::Object(state), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_get_u64_variants() {
        let state = from_value(json!({"i": 24, "f": 12.0, "s": " 6 ", "neg": -1, "frac": 1.5}));
        assert_eq!(get_u64(&state, "i"), Some(24));
        assert_eq!(get_u64(&state, "f"), Some(12));
        assert_eq!(get_u64(&state, "s"), Some(6));
        assert_eq!(get_u64(&state, "neg"), None);
        assert_eq!(get_u64(&state, "frac"), None);
        assert_eq!(get_u64(&state, "missing"), None);
    }

    #[test]
    fn test_from_value_non_object() {
        assert!(from_value(json!([1, 2])).is_empty());
    }
}
