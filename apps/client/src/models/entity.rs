use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::normalize::keys::camelize_map;

/// Top-level keys that nested `data` may never overwrite.
/// `tempId` and `draftedAt` belong to the draft envelope.
pub const RESERVED_KEYS: &[&str] = &["id", "type", "data", "tempId", "draftedAt"];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Account,
    Persona,
    Campaign,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Company,
        EntityKind::Account,
        EntityKind::Persona,
        EntityKind::Campaign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Account => "account",
            EntityKind::Persona => "persona",
            EntityKind::Campaign => "campaign",
        }
    }

    /// Durable storage key holding this kind's drafts.
    pub fn draft_storage_key(&self) -> String {
        format!("draft_{}", self.as_str())
    }

    /// Path segment of the remote collection.
    pub fn collection_path(&self) -> &'static str {
        match self {
            EntityKind::Company => "companies",
            EntityKind::Account => "accounts",
            EntityKind::Persona => "personas",
            EntityKind::Campaign => "campaigns",
        }
    }

    /// Generated field used as the display name when the record carries none.
    pub fn title_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Company => Some("companyName"),
            EntityKind::Account => Some("targetAccountName"),
            EntityKind::Persona => Some("targetPersonaName"),
            EntityKind::Campaign => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" | "companies" => Ok(EntityKind::Company),
            "account" | "accounts" => Ok(EntityKind::Account),
            "persona" | "personas" => Ok(EntityKind::Persona),
            "campaign" | "campaigns" => Ok(EntityKind::Campaign),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

/// A normalized entity record.
///
/// `data` holds the generated content with camelCase keys; `fields` holds every
/// other top-level key, including the flattened copies of `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Reads a field the way consumers do: flattened copy first, then `data`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).or_else(|| self.data.get(key))
    }

    /// Field-preserving merge. Keys present in `partial` overwrite both the
    /// nested `data` entry and the top-level copy; everything else is kept.
    /// `id`, `tempId` and `draftedAt` are immutable here.
    pub fn merge_preserving_fields(&mut self, partial: &Map<String, Value>) {
        for (key, value) in camelize_map(partial) {
            match key.as_str() {
                "id" | "tempId" | "draftedAt" => continue,
                "type" => self.entity_type = value.as_str().map(String::from),
                "data" => {
                    if let Value::Object(nested) = value {
                        for (nested_key, nested_value) in nested {
                            self.set_data_field(nested_key, nested_value);
                        }
                    }
                }
                _ => self.set_data_field(key, value),
            }
        }
    }

    fn set_data_field(&mut self, key: String, value: Value) {
        if is_reserved_key(&key) {
            return;
        }
        if key == "name" {
            if let Some(name) = value.as_str() {
                self.name = Some(name.to_string());
            }
            self.data.insert(key, value);
            return;
        }
        self.data.insert(key.clone(), value.clone());
        self.fields.insert(key, value);
    }

    /// Body sent to create/update routes.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({ "data": Value::Object(self.data.clone()) });
        if let Some(name) = &self.name {
            payload["name"] = Value::String(name.clone());
        }
        if let Some(entity_type) = &self.entity_type {
            payload["type"] = Value::String(entity_type.clone());
        }
        payload
    }
}

/// An unsaved entity owned by the draft store. Identified by `tempId`, never by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub temp_id: String,
    pub drafted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub entity: Entity,
}

impl Draft {
    /// The draft as an entity addressed by its temp id, for caches and local lists.
    pub fn to_entity(&self) -> Entity {
        Entity {
            id: Some(self.temp_id.clone()),
            ..self.entity.clone()
        }
    }
}
