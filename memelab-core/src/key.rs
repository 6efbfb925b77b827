//! Deterministic cache keys derived from a tool name and its parameters.
//!
//! The key is the tool name, the `:` separator, and a canonical JSON rendering
//! of the parameters in which every object's keys are sorted. Two call-sites
//! passing structurally equal parameters therefore address the same entry no
//! matter how their maps were built.

use serde_json::{Map, Value};
use std::fmt;

use crate::tier::{ToolName, KEY_SEPARATOR};

/// A cache key scoped to a tool.
///
/// Construction goes through [`CacheKey::derive`], which requires a validated
/// [`ToolName`], so every key carries its tool tag and can be matched by
/// [`CacheKey::tool_prefix`] for bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    tool: ToolName,
    encoded: String,
}

impl CacheKey {
    /// Derive the key for `tool` and `params`.
    ///
    /// Absent parameters and JSON `null` are both treated as the empty object,
    /// so `derive(tool, None)` and `derive(tool, Some(&json!({})))` are equal.
    pub fn derive(tool: &ToolName, params: Option<&Value>) -> Self {
        let normalized = normalize_params(params);
        let mut encoded = String::with_capacity(tool.as_str().len() + 16);
        encoded.push_str(tool.as_str());
        encoded.push(KEY_SEPARATOR);
        write_canonical(&normalized, &mut encoded);
        Self {
            tool: tool.clone(),
            encoded,
        }
    }

    /// The tool this key belongs to.
    pub fn tool(&self) -> &ToolName {
        &self.tool
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Key bytes for byte-keyed stores.
    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }

    /// Prefix shared by every key derived from `tool`.
    ///
    /// Tool names cannot contain the separator, so the prefix of one tool is
    /// never a prefix of another tool's keys.
    pub fn tool_prefix(tool: &ToolName) -> String {
        let mut prefix = String::with_capacity(tool.as_str().len() + 1);
        prefix.push_str(tool.as_str());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    /// Check whether this key was derived from `tool`.
    pub fn belongs_to(&self, tool: &ToolName) -> bool {
        &self.tool == tool
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

/// Replace absent or `null` parameters with an empty object.
pub fn normalize_params(params: Option<&Value>) -> Value {
    match params {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value) => value.clone(),
    }
}

/// Render `value` as compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value's Display escapes strings exactly as serde_json does.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolName {
        ToolName::new(name).unwrap()
    }

    #[test]
    fn test_absent_params_equal_empty_object() {
        let t = tool("trending");
        let absent = CacheKey::derive(&t, None);
        let empty = CacheKey::derive(&t, Some(&json!({})));
        let null = CacheKey::derive(&t, Some(&Value::Null));
        assert_eq!(absent, empty);
        assert_eq!(absent, null);
        assert_eq!(absent.as_str(), "trending:{}");
    }

    #[test]
    fn test_key_format() {
        let key = CacheKey::derive(&tool("trending"), Some(&json!({"region": "US"})));
        assert_eq!(key.as_str(), r#"trending:{"region":"US"}"#);
        assert_eq!(key.tool().as_str(), "trending");
    }

    #[test]
    fn test_nested_keys_are_sorted() {
        let value = json!({
            "z": [ {"b": 1, "a": 2} ],
            "a": {"y": true, "x": null},
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"x":null,"y":true},"z":[{"a":2,"b":1}]}"#
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        let t = tool("translate");
        let a = CacheKey::derive(&t, Some(&json!({"langs": ["en", "es"]})));
        let b = CacheKey::derive(&t, Some(&json!({"langs": ["es", "en"]})));
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_params_different_tools_differ() {
        let params = json!({"address": "So1ana"});
        let a = CacheKey::derive(&tool("analyze-token"), Some(&params));
        let b = CacheKey::derive(&tool("contract-meme"), Some(&params));
        assert_ne!(a, b);
    }

    #[test]
    fn test_escaped_keys_and_strings() {
        let value = json!({"quote\"d": "line\nbreak"});
        assert_eq!(canonical_json(&value), r#"{"quote\"d":"line\nbreak"}"#);
    }

    #[test]
    fn test_tool_prefix_matches_only_own_tool() {
        let trend = tool("trend");
        let trending = tool("trending");
        let prefix = CacheKey::tool_prefix(&trend);
        let own = CacheKey::derive(&trend, None);
        let other = CacheKey::derive(&trending, None);
        assert!(own.as_str().starts_with(&prefix));
        assert!(!other.as_str().starts_with(&prefix));
        assert!(own.belongs_to(&trend));
        assert!(!other.belongs_to(&trend));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::from(n)),
            "[a-zA-Z0-9 _:\"-]{0,12}".prop_map(Value::String),
        ]
    }

    fn json_value() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn json_object() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z]{1,6}", json_value(), 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Rebuilding an object with its entries in reverse order yields the same key.
        #[test]
        fn prop_key_ignores_insertion_order(object in json_object()) {
            let tool = ToolName::new("trending").unwrap();
            let forward = Value::Object(object.clone());
            let mut reversed = Map::new();
            for (k, v) in object.iter().rev() {
                reversed.insert(k.clone(), v.clone());
            }
            let reversed = Value::Object(reversed);

            prop_assert_eq!(
                CacheKey::derive(&tool, Some(&forward)),
                CacheKey::derive(&tool, Some(&reversed))
            );
        }

        /// Canonical rendering is valid JSON describing the same value.
        #[test]
        fn prop_canonical_json_parses_back(value in json_value()) {
            let rendered = canonical_json(&value);
            let parsed: Value = serde_json::from_str(&rendered).unwrap();
            prop_assert_eq!(parsed, value);
        }

        /// Distinct parameter objects produce distinct keys.
        #[test]
        fn prop_distinct_params_distinct_keys(a in json_object(), b in json_object()) {
            let tool = ToolName::new("translate").unwrap();
            let va = Value::Object(a);
            let vb = Value::Object(b);
            let ka = CacheKey::derive(&tool, Some(&va));
            let kb = CacheKey::derive(&tool, Some(&vb));
            prop_assert_eq!(va == vb, ka == kb);
        }
    }
}
