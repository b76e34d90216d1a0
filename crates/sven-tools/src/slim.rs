// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Schema slimming: trims verbose tool-parameter JSON schemas down to what a
//! model actually needs to call the tool correctly, so the schema payload
//! doesn't eat an outsized share of the context budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Options controlling how aggressively a schema is slimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct SlimOptions {
    /// Max length of the top-level tool description. Parameter descriptions
    /// are truncated to half this.
    pub max_description_length: usize,
    /// When true, non-required parameters are dropped from `properties`
    /// entirely (and removed from `required` if present).
    pub drop_non_required: bool,
}

impl Default for SlimOptions {
    fn default() -> Self {
        Self {
            max_description_length: 100,
            drop_non_required: false,
        }
    }
}

fn truncate_prose(text: &str, max_len: usize) -> String {
    let cut = match text.find("Example:") {
        Some(idx) => &text[..idx],
        None => text,
    };
    let cut = cut.trim_end();
    if cut.chars().count() <= max_len {
        return cut.to_string();
    }
    let truncated: String = cut.chars().take(max_len.saturating_sub(1)).collect();
    format!("{}…", truncated.trim_end())
}

/// Slim a tool's JSON schema per `opts`. Non-object/malformed input is
/// returned unchanged — this function only trims; it never invalidates an
/// otherwise-usable schema.
pub fn slim_schema(schema: &Value, opts: &SlimOptions) -> Value {
    let mut out = schema.clone();

    let Some(obj) = out.as_object_mut() else {
        return out;
    };

    if let Some(Value::String(desc)) = obj.get("description").cloned() {
        obj.insert(
            "description".to_string(),
            Value::String(truncate_prose(&desc, opts.max_description_length)),
        );
    }

    let required: Vec<String> = obj
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    if let Some(Value::Object(props)) = obj.get_mut("properties") {
        let param_max = (opts.max_description_length / 2).max(1);
        let keys: Vec<String> = props.keys().cloned().collect();
        for key in keys {
            if opts.drop_non_required && !required.contains(&key) {
                props.remove(&key);
                continue;
            }
            if let Some(param) = props.get_mut(&key).and_then(|p| p.as_object_mut()) {
                if let Some(Value::String(desc)) = param.get("description").cloned() {
                    param.insert(
                        "description".to_string(),
                        Value::String(truncate_prose(&desc, param_max)),
                    );
                }
            }
        }
    }

    out
}

fn opts_fingerprint(opts: &SlimOptions) -> String {
    format!("{}:{}", opts.max_description_length, opts.drop_non_required)
}

fn content_hash(name: &str, schema: &Value, opts: &SlimOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(opts_fingerprint(opts).as_bytes());
    hasher.update(b"|");
    hasher.update(serde_json::to_string(schema).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Content-hash-keyed cache of slimmed schemas.
///
/// Two calls with the same tool name, source schema, and options return the
/// *same* `Arc<Value>` rather than separately-allocated equal values, so
/// callers that compare by pointer identity (or just want to avoid
/// reallocating per turn) get stable reuse.
pub struct SchemaCache {
    entries: Mutex<HashMap<String, Arc<Value>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached slim schema for `(name, schema, opts)`, computing
    /// and storing it on first access.
    pub fn get_or_create(&self, name: &str, schema: &Value, opts: &SlimOptions) -> Arc<Value> {
        let key = content_hash(name, schema, opts);
        let mut entries = self.entries.lock().expect("schema cache lock poisoned");
        if let Some(existing) = entries.get(&key) {
            return existing.clone();
        }
        let slimmed = Arc::new(slim_schema(schema, opts));
        entries.insert(key, slimmed.clone());
        slimmed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("schema cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncates_long_description() {
        let schema = json!({ "description": "x".repeat(200), "type": "object" });
        let opts = SlimOptions { max_description_length: 10, ..Default::default() };
        let slim = slim_schema(&schema, &opts);
        assert!(slim["description"].as_str().unwrap().chars().count() <= 10);
    }

    #[test]
    fn drops_prose_after_example_marker() {
        let schema = json!({ "description": "Reads a file. Example: read_file(\"a.txt\")" });
        let slim = slim_schema(&schema, &SlimOptions::default());
        assert_eq!(slim["description"], "Reads a file.");
    }

    #[test]
    fn param_descriptions_use_half_the_budget() {
        let schema = json!({
            "description": "d",
            "properties": { "path": { "description": "y".repeat(200) } }
        });
        let opts = SlimOptions { max_description_length: 20, ..Default::default() };
        let slim = slim_schema(&schema, &opts);
        let param_desc = slim["properties"]["path"]["description"].as_str().unwrap();
        assert!(param_desc.chars().count() <= 10);
    }

    #[test]
    fn drop_non_required_removes_optional_params() {
        let schema = json!({
            "properties": { "path": {}, "encoding": {} },
            "required": ["path"]
        });
        let opts = SlimOptions { drop_non_required: true, ..Default::default() };
        let slim = slim_schema(&schema, &opts);
        let props = slim["properties"].as_object().unwrap();
        assert!(props.contains_key("path"));
        assert!(!props.contains_key("encoding"));
    }

    #[test]
    fn non_object_schema_is_returned_unchanged() {
        let schema = json!("not an object");
        let slim = slim_schema(&schema, &SlimOptions::default());
        assert_eq!(slim, schema);
    }

    #[test]
    fn cache_returns_same_value_for_same_key() {
        let cache = SchemaCache::new();
        let schema = json!({ "description": "a tool" });
        let opts = SlimOptions::default();
        let a = cache.get_or_create("t", &schema, &opts);
        let b = cache.get_or_create("t", &schema, &opts);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_distinguishes_by_options() {
        let cache = SchemaCache::new();
        let schema = json!({ "description": "a tool" });
        let a = cache.get_or_create("t", &schema, &SlimOptions { max_description_length: 5, ..Default::default() });
        let b = cache.get_or_create("t", &schema, &SlimOptions { max_description_length: 50, ..Default::default() });
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }
}
