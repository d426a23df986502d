//! JSON-schema generation for strict structured output.
//!
//! Strict mode rejects what `schemars` emits by default: objects without
//! `additionalProperties: false`, optional fields missing from `required`,
//! and `$ref` indirection through a definitions table. Instead of patching
//! the generated document in separate passes, the definitions table is
//! detached up front and a single walk rewrites each node into the strict
//! form.

use std::collections::BTreeSet;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Types usable as enforced structured output.
/// Blanket-implemented for anything `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn json_schema() -> Value {
        let mut root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();
        let defs = match &mut root {
            Value::Object(map) => {
                map.remove("$schema");
                map.remove("definitions").unwrap_or(Value::Null)
            }
            _ => Value::Null,
        };
        strictify(&mut root, &defs, 0);
        root
    }

    fn schema_name_str() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Cap on nesting and on ref-chain splicing. Our judge outputs are two
/// levels deep; anything past this is a malformed or cyclic schema and is
/// left as-is rather than looping.
const MAX_DEPTH: u32 = 16;

/// Rewrite one node (and everything under it) into strict form:
/// 1. splice `#/definitions/` refs and unwrap single-variant `allOf`
///    wrappers until the node is a plain schema;
/// 2. for object schemas, force `additionalProperties: false` and list every
///    property in `required` (sorted, nullable ones included);
/// 3. recurse into children.
fn strictify(node: &mut Value, defs: &Value, depth: u32) {
    if depth > MAX_DEPTH {
        return;
    }

    let mut splices = 0;
    while splices <= MAX_DEPTH {
        let replacement = spliced(node, defs);
        match replacement {
            Some(inner) => *node = inner,
            None => break,
        }
        splices += 1;
    }

    match node {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                let names: BTreeSet<String> = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().collect())
                    .unwrap_or_default();
                let required = names.into_iter().map(Value::String).collect();
                map.insert("required".to_string(), Value::Array(required));
            }
            for child in map.values_mut() {
                strictify(child, defs, depth + 1);
            }
        }
        Value::Array(items) => {
            for child in items {
                strictify(child, defs, depth + 1);
            }
        }
        _ => {}
    }
}

/// If the node is pure indirection, return what it should be replaced with.
fn spliced(node: &Value, defs: &Value) -> Option<Value> {
    let map = node.as_object()?;
    if let Some(path) = map.get("$ref").and_then(Value::as_str) {
        let name = path.strip_prefix("#/definitions/")?;
        return defs.get(name).cloned();
    }
    match map.get("allOf").and_then(Value::as_array) {
        Some(variants) if variants.len() == 1 => Some(variants[0].clone()),
        _ => None,
    }
}
