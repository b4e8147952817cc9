//! Canonical JSON helpers: sorted keys, minimal separators.
//!
//! Two values equal as maps must serialise to byte-identical strings, so
//! relevance scoring (§4.8) and the `value` comparisons backing
//! idempotent writes are deterministic across runs. `serde_json::Map` is
//! backed by a `BTreeMap` (this crate does not enable the `preserve_order`
//! feature), so key ordering is already canonical at every nesting level;
//! [`serde_json::to_string`] already emits no extraneous whitespace. These
//! helpers exist so callers have one obvious place to reach for this,
//! rather than reasoning about feature flags at each call site.

use serde_json::Value;

/// Serialise `value` to a canonical JSON string.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `value` contains a non-finite float,
/// the only way `serde_json` serialisation of an already-parsed [`Value`]
/// can fail.
pub fn to_canonical_string(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_is_canonical_regardless_of_insertion_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            to_canonical_string(&a).unwrap(),
            to_canonical_string(&b).unwrap()
        );
    }

    #[test]
    fn nested_objects_are_also_sorted() {
        let value = json!({"outer": {"z": 1, "a": 2}});
        let s = to_canonical_string(&value).unwrap();
        assert_eq!(s, r#"{"outer":{"a":2,"z":1}}"#);
    }
}
