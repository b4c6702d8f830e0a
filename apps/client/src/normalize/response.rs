//! Reshapes raw service payloads into `Entity` records.
//!
//! Output = raw top-level fields, overlaid with the camelCase `data` fields,
//! with `id`, `type` and `data` re-asserted so nested content never replaces them.
//! Both access patterns work afterwards: `entity.fields["targetAccountName"]`
//! and `entity.data["targetAccountName"]`.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::models::entity::{is_reserved_key, Entity, EntityKind};
use crate::normalize::keys::camelize_map;

/// Normalizes one stored entity (`{ id, name, type?, data }`).
///
/// A non-object payload is an `InvalidPayload` error. A missing or null `data`
/// becomes an empty object; any other non-object `data` is coerced to empty.
pub fn normalize_entity(kind: EntityKind, raw: Value) -> Result<Entity, ClientError> {
    let Value::Object(mut raw) = raw else {
        return Err(ClientError::InvalidPayload(format!(
            "{kind} response is not a JSON object"
        )));
    };

    let data = match raw.remove("data") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(data)) => camelize_map(&data),
        Some(other) => {
            warn!(
                "{kind} payload has non-object data ({}); using empty data",
                json_type(&other)
            );
            Map::new()
        }
    };

    let id = raw.remove("id").and_then(scalar_to_string);
    let entity_type = raw
        .remove("type")
        .and_then(|v| v.as_str().map(String::from));
    let mut name = raw
        .remove("name")
        .and_then(|v| v.as_str().map(String::from));

    let mut fields = raw;
    fields.retain(|key, _| !is_reserved_key(key));

    for (key, value) in &data {
        if is_reserved_key(key) {
            continue;
        }
        if key == "name" {
            if let Some(nested_name) = value.as_str() {
                name = Some(nested_name.to_string());
            }
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }

    if name.is_none() {
        name = kind
            .title_field()
            .and_then(|field| fields.get(field))
            .and_then(Value::as_str)
            .map(String::from);
    }

    debug!(
        "Normalized {kind} {}: {} data fields",
        id.as_deref().unwrap_or("<unsaved>"),
        data.len()
    );

    Ok(Entity {
        id,
        name,
        entity_type,
        data,
        fields,
    })
}

pub fn normalize_entities(kind: EntityKind, raw: Vec<Value>) -> Result<Vec<Entity>, ClientError> {
    raw.into_iter()
        .map(|item| normalize_entity(kind, item))
        .collect()
}

/// Normalizes raw AI generation output.
///
/// Generation endpoints return the generated document itself (e.g. a target
/// account profile), not a stored record, so it becomes the entity's `data`.
/// Email generation yields campaigns of type `email`.
pub fn normalize_generated(kind: EntityKind, raw: Value) -> Result<Entity, ClientError> {
    let record = match raw {
        Value::Object(map) if map.get("data").is_some_and(Value::is_object) => Value::Object(map),
        Value::Object(map) => {
            let mut record = Map::new();
            record.insert("data".to_string(), Value::Object(map));
            Value::Object(record)
        }
        other => other,
    };

    let mut entity = normalize_entity(kind, record)?;
    if kind == EntityKind::Campaign && entity.entity_type.is_none() {
        entity.entity_type = Some("email".to_string());
    }
    Ok(entity)
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
