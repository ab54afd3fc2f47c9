//! Response schema for strict structured output.
//!
//! The base schema is generated from [`JudgeReply`] with `schemars`, then
//! hardened for strict mode: every object closed with
//! `additionalProperties: false`, every property required, refs inlined.
//! The `extractedFields` map is replaced by a closed object listing exactly
//! the contract's fields, so the model cannot invent one.

use schemars::schema_for;
use serde_json::{json, Map, Value};

use crate::judge::response::JudgeReply;
use crate::types::SchemaContract;

/// Schema name sent with the response format.
pub const RESPONSE_SCHEMA_NAME: &str = "entity_judgments";

/// Strict JSON schema of a reply for this contract.
pub fn response_schema(contract: &SchemaContract) -> Value {
    let mut value = serde_json::to_value(schema_for!(JudgeReply)).unwrap_or_default();

    close_objects(&mut value);
    inline_refs(&mut value);
    if let Value::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
    }
    strip_keys(&mut value, &["format", "title"]);

    if let Some(Value::Object(verdict_props)) = value.pointer_mut("/properties/items/items/properties") {
        verdict_props.insert(
            "classification".to_string(),
            json!({
                "type": "string",
                "enum": ["INDIVIDUAL", "AGGREGATE", "UNKNOWN"],
            }),
        );
        verdict_props.insert("extractedFields".to_string(), fields_object(contract));
    }

    value
}

/// The `response_format` value for an OpenAI-compatible chat request.
pub fn response_format(contract: &SchemaContract) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": RESPONSE_SCHEMA_NAME,
            "strict": true,
            "schema": response_schema(contract),
        }
    })
}

fn fields_object(contract: &SchemaContract) -> Value {
    let properties: Map<String, Value> = contract
        .fields
        .keys()
        .map(|name| (name.clone(), json!({ "type": ["string", "null"] })))
        .collect();
    let required: Vec<Value> = contract.fields.keys().map(|k| json!(k)).collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Close every object schema and mark all of its properties required.
fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type") == Some(&Value::String("object".to_string())) {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let keys: Vec<Value> = props.keys().map(|k| Value::String(k.clone())).collect();
                    map.insert("required".to_string(), Value::Array(keys));
                }
            }
            for (_, v) in map.iter_mut() {
                close_objects(v);
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn inline_refs(value: &mut Value) {
    let definitions = match value {
        Value::Object(map) => map.get("definitions").cloned(),
        _ => None,
    };
    if let Some(defs) = definitions {
        inline_from(value, &defs);
    }
}

fn inline_from(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(path)) = map.get("$ref").cloned() {
                if let Some(def) = path
                    .strip_prefix("#/definitions/")
                    .and_then(|name| definitions.get(name))
                {
                    *value = def.clone();
                    inline_from(value, definitions);
                    return;
                }
            }
            for (_, v) in map.iter_mut() {
                inline_from(v, definitions);
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(|v| inline_from(v, definitions)),
        _ => {}
    }
}

fn strip_keys(value: &mut Value, keys: &[&str]) {
    match value {
        Value::Object(map) => {
            for key in keys {
                // Only drop keywords, never a property that happens to share the name
                if map.get(*key).is_some_and(|v| v.is_string()) {
                    map.remove(*key);
                }
            }
            for (_, v) in map.iter_mut() {
                strip_keys(v, keys);
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(|v| strip_keys(v, keys)),
        _ => {}
    }
}
