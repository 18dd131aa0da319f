//! JSON Schema `$ref` dereferencing and normalization.
//!
//! References are resolved by key: the last segment of `#/definitions/<key>`,
//! `#/$defs/<key>` or `#/components/schemas/<key>`, or the raw string for any
//! other form. A reference whose key is already being expanded on the
//! current path is a cycle and becomes an empty object schema. Keywords
//! written next to a `$ref` (title, description, …) override the ones of the
//! referenced definition.

use serde_json::{json, Map, Value};

const REF_PREFIXES: [&str; 3] = ["#/definitions/", "#/$defs/", "#/components/schemas/"];

/// Key a `$ref` string is looked up by.
pub fn ref_key(reference: &str) -> &str {
    REF_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
        .unwrap_or(reference)
}

/// Schema substituted for a cyclic or unresolvable reference.
pub fn empty_object_schema() -> Value {
    json!({"type": "object"})
}

/// Inline every `$ref` in `schema`.
///
/// `shared` holds definitions supplied by the schema source; definitions
/// embedded in the schema itself (`definitions`, `$defs`) take precedence and
/// are removed from the result once inlined.
pub fn dereference(schema: &Value, shared: &Map<String, Value>) -> Value {
    let mut scope = shared.clone();
    let mut root = schema.clone();
    if let Value::Object(object) = &mut root {
        for key in ["definitions", "$defs"] {
            if let Some(Value::Object(local)) = object.remove(key) {
                scope.extend(local);
            }
        }
    }

    let mut path = Vec::new();
    resolve(&root, &scope, &mut path)
}

fn resolve(value: &Value, scope: &Map<String, Value>, path: &mut Vec<String>) -> Value {
    match value {
        Value::Object(object) => match object.get("$ref") {
            Some(Value::String(reference)) => resolve_ref(reference, object, scope, path),
            _ => Value::Object(
                object
                    .iter()
                    .map(|(k, v)| (k.clone(), resolve(v, scope, path)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, scope, path)).collect()),
        other => other.clone(),
    }
}

fn resolve_ref(
    reference: &str,
    site: &Map<String, Value>,
    scope: &Map<String, Value>,
    path: &mut Vec<String>,
) -> Value {
    let key = ref_key(reference);
    if path.iter().any(|visited| visited == key) {
        tracing::debug!(reference, "cyclic schema reference replaced by an empty object");
        return empty_object_schema();
    }

    let Some(definition) = scope.get(key) else {
        tracing::warn!(reference, "unresolved schema reference replaced by an empty object");
        return empty_object_schema();
    };

    path.push(key.to_string());
    let mut resolved = resolve(definition, scope, path);
    path.pop();

    let overrides: Vec<(&String, &Value)> = site.iter().filter(|(k, _)| *k != "$ref").collect();
    if overrides.is_empty() {
        return resolved;
    }
    match &mut resolved {
        Value::Object(merged) => {
            for (k, v) in overrides {
                merged.insert(k.clone(), resolve(v, scope, path));
            }
            resolved
        }
        // A non-object definition cannot take sibling keywords.
        _ => resolved,
    }
}

/// Whether `schema` describes a JSON object.
pub fn is_object_schema(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k == "object"),
        None => schema.get("properties").is_some_and(Value::is_object),
        _ => false,
    }
}

/// Make sure a tool always advertises an object parameter schema.
pub fn normalize_object_schema(schema: Value) -> Value {
    if !is_object_schema(&schema) {
        return json!({"type": "object", "additionalProperties": true});
    }
    match schema {
        Value::Object(mut object) => {
            object
                .entry("type")
                .or_insert_with(|| Value::String("object".to_string()));
            Value::Object(object)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("definitions must be an object"),
        }
    }

    #[test]
    fn test_ref_key_forms() {
        assert_eq!(ref_key("#/definitions/User"), "User");
        assert_eq!(ref_key("#/$defs/User"), "User");
        assert_eq!(ref_key("#/components/schemas/User"), "User");
        assert_eq!(ref_key("User"), "User");
    }

    #[test]
    fn test_inlines_shared_definition() {
        let shared = defs(json!({
            "Address": {"type": "object", "properties": {"city": {"type": "string"}}}
        }));
        let schema = json!({
            "type": "object",
            "properties": {"home": {"$ref": "#/definitions/Address"}}
        });

        let resolved = dereference(&schema, &shared);
        assert_eq!(
            resolved["properties"]["home"]["properties"]["city"]["type"],
            "string"
        );
    }

    #[test]
    fn test_local_keywords_override_definition() {
        let shared = defs(json!({
            "Id": {"type": "string", "description": "generic id", "title": "Id"}
        }));
        let schema = json!({
            "$ref": "#/definitions/Id",
            "description": "the folder to list"
        });

        let resolved = dereference(&schema, &shared);
        assert_eq!(resolved["description"], "the folder to list");
        assert_eq!(resolved["title"], "Id");
        assert_eq!(resolved["type"], "string");
        assert!(resolved.get("$ref").is_none());
    }

    #[test]
    fn test_cycle_terminates_with_single_empty_object() {
        let schema = json!({
            "$defs": {
                "Node": {
                    "type": "object",
                    "properties": {
                        "value": {"type": "integer"},
                        "next": {"$ref": "#/$defs/Node"}
                    }
                }
            },
            "$ref": "#/$defs/Node"
        });

        let resolved = dereference(&schema, &Map::new());
        assert_eq!(resolved["properties"]["value"]["type"], "integer");
        assert_eq!(resolved["properties"]["next"], json!({"type": "object"}));
        assert!(resolved.get("$defs").is_none());
    }

    #[test]
    fn test_mutual_cycle() {
        let shared = defs(json!({
            "A": {"type": "object", "properties": {"b": {"$ref": "B"}}},
            "B": {"type": "object", "properties": {"a": {"$ref": "A"}}}
        }));

        let resolved = dereference(&json!({"$ref": "A"}), &shared);
        assert_eq!(
            resolved["properties"]["b"]["properties"]["a"],
            json!({"type": "object"})
        );
    }

    #[test]
    fn test_repeated_non_cyclic_reference_is_expanded_each_time() {
        let shared = defs(json!({"Tag": {"type": "string"}}));
        let schema = json!({
            "type": "object",
            "properties": {"a": {"$ref": "Tag"}, "b": {"$ref": "Tag"}}
        });

        let resolved = dereference(&schema, &shared);
        assert_eq!(resolved["properties"]["a"]["type"], "string");
        assert_eq!(resolved["properties"]["b"]["type"], "string");
    }

    #[test]
    fn test_missing_reference_becomes_empty_object() {
        let resolved = dereference(&json!({"$ref": "#/definitions/Gone"}), &Map::new());
        assert_eq!(resolved, json!({"type": "object"}));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize_object_schema(json!({"type": "string"})),
            json!({"type": "object", "additionalProperties": true})
        );
        assert_eq!(
            normalize_object_schema(Value::Null),
            json!({"type": "object", "additionalProperties": true})
        );
        assert_eq!(
            normalize_object_schema(json!({"properties": {}})),
            json!({"type": "object", "properties": {}})
        );
        let object = json!({"type": "object", "required": ["x"]});
        assert_eq!(normalize_object_schema(object.clone()), object);
    }
}
