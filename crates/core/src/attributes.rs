//! Dynamic product attributes and the ontology schema they are checked against.
//!
//! The attribute key set differs per product type, so attributes are a plain
//! ordered string map rather than a fixed struct.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{DomainError, DomainResult};

/// Attribute name -> attribute value.
pub type AttributeMap = BTreeMap<String, String>;

/// A project's attribute ontology, stored as an arbitrary JSON object.
///
/// Recognised shape (all keys optional):
///
/// ```json
/// { "subset": "tee", "attributes": { "color": ["red", "blue"], "fit": {} } }
/// ```
///
/// `attributes` may also be an array of `{ "name": ... }` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSchema(JsonMap<String, JsonValue>);

impl AttributeSchema {
    pub fn new(raw: JsonMap<String, JsonValue>) -> Self {
        Self(raw)
    }

    /// Build from any JSON value; only objects are accepted.
    pub fn from_json(value: JsonValue) -> DomainResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(DomainError::validation(format!(
                "attribute schema must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_json(&self) -> &JsonMap<String, JsonValue> {
        &self.0
    }

    /// Product subset this schema describes (e.g. `"tee"`).
    pub fn subset(&self) -> Option<&str> {
        self.0.get("subset").and_then(JsonValue::as_str)
    }

    /// Attribute names declared by the schema. Empty when the schema does not
    /// enumerate its attributes.
    pub fn key_set(&self) -> BTreeSet<String> {
        match self.0.get("attributes") {
            Some(JsonValue::Object(attrs)) => attrs.keys().cloned().collect(),
            Some(JsonValue::Array(entries)) => entries
                .iter()
                .filter_map(|e| match e {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Object(o) => o.get("name").and_then(JsonValue::as_str).map(str::to_string),
                    _ => None,
                })
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Keep only attributes the schema declares. Returns the input unchanged
    /// when the schema declares no key set.
    pub fn retain_known(&self, attributes: AttributeMap) -> AttributeMap {
        let keys = self.key_set();
        if keys.is_empty() {
            return attributes;
        }
        attributes
            .into_iter()
            .filter(|(k, _)| keys.contains(k))
            .collect()
    }
}

/// Flatten a JSON object into an attribute map. Scalars are stringified,
/// nulls dropped, nested values serialised as JSON text.
pub fn attributes_from_json(value: &JsonValue) -> DomainResult<AttributeMap> {
    let obj = value.as_object().ok_or_else(|| {
        DomainError::validation(format!(
            "attributes must be a JSON object, got {}",
            json_kind(value)
        ))
    })?;

    Ok(obj
        .iter()
        .filter_map(|(k, v)| {
            let s = match v {
                JsonValue::Null => return None,
                JsonValue::String(s) => s.clone(),
                JsonValue::Bool(b) => b.to_string(),
                JsonValue::Number(n) => n.to_string(),
                nested => nested.to_string(),
            };
            Some((k.clone(), s))
        })
        .collect())
}

fn json_kind(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
