//! Conversion helpers between engine values and Cloud Control properties

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::Value;
use stratus_core::schema::ResourceSchema;

use crate::control_plane::RemoteObject;

/// Tag in CloudFormation format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Build a tag list from a tag map, sorted by key
pub fn build_tags(tags: &HashMap<String, String>) -> Vec<Tag> {
    let mut tags: Vec<Tag> = tags
        .iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect();
    tags.sort_by(|a, b| a.key.cmp(&b.key));
    tags
}

/// Parse tags from CloudFormation format to a map
pub fn parse_tags(tags: &[serde_json::Value]) -> HashMap<String, Value> {
    tags.iter()
        .filter_map(|tag| {
            let key = tag.get("Key")?.as_str()?;
            let value = tag.get("Value")?.as_str()?;
            Some((key.to_string(), Value::String(value.to_string())))
        })
        .collect()
}

/// Convert a JSON value to an engine value
pub fn json_to_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Value::Int),
        serde_json::Value::Array(arr) => {
            Some(Value::List(arr.iter().filter_map(json_to_value).collect()))
        }
        serde_json::Value::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        serde_json::Value::Null => None,
    }
}

/// Serialize a typed configuration into a desired-state document
pub fn desired_state<T: Serialize>(config: &T) -> ProviderResult<serde_json::Value> {
    serde_json::to_value(config)
        .map_err(|e| ProviderError::new(format!("Failed to build desired state: {}", e)))
}

/// Map remote properties to engine attributes through each attribute's provider name
///
/// Provider names may address nested properties with `/` (e.g. "State/Name").
/// A `tags` attribute is read from the CloudFormation tag list.
pub fn attributes_from_properties(
    schema: &ResourceSchema,
    object: &RemoteObject,
) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();

    for (name, attr) in &schema.attributes {
        let Some(provider_name) = &attr.provider_name else {
            continue;
        };
        let Some(raw) = object.property(provider_name) else {
            continue;
        };
        let value = if name == "tags" {
            raw.as_array()
                .map(|tags| parse_tags(tags))
                .filter(|tags| !tags.is_empty())
                .map(Value::Map)
        } else {
            json_to_value(raw)
        };
        if let Some(value) = value {
            attributes.insert(name.clone(), value);
        }
    }

    attributes
}

/// Top-level properties an update may change: mapped, writable, not force-new
pub fn mutable_properties(schema: &ResourceSchema) -> Vec<&str> {
    let mut names: Vec<&str> = schema
        .attributes
        .values()
        .filter(|a| !a.computed && !a.force_new)
        .filter_map(|a| a.provider_name.as_deref())
        .filter(|p| !p.contains('/'))
        .collect();
    names.sort();
    names
}

/// Build a JSON Patch document moving `current` towards `desired`
///
/// Only the listed top-level properties are considered. Optional properties
/// left out of `desired` keep their remote value; tags are replaced wholesale.
pub fn patch_document(
    current: &serde_json::Value,
    desired: &serde_json::Value,
    properties: &[&str],
) -> Vec<serde_json::Value> {
    let mut ops = Vec::new();
    for name in properties {
        let path = format!("/{}", name);
        match (current.get(*name), desired.get(*name)) {
            (None, Some(value)) => ops.push(json!({"op": "add", "path": path, "value": value})),
            (Some(old), Some(value)) if old != value => {
                ops.push(json!({"op": "replace", "path": path, "value": value}))
            }
            (Some(_), None) if *name == "Tags" => {
                ops.push(json!({"op": "remove", "path": path}))
            }
            _ => {}
        }
    }
    ops
}
