use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{ClientError, Result};
use crate::model::common::{id_of, to_snake_case};
use crate::model::Id;

/// Describes one kind of entity exposed by the remote API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityDef {
    /// Unique name within a registry (e.g. "Ticket", "BugTicket")
    pub name: String,

    /// Wire-level type tag; filled in at registration when left unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    /// Field/value pairs a payload must carry to be this kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polymorphic: Option<Map<String, Value>>,

    /// Literal endpoint path replacing the pluralized tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Query parameters sent with every request for this kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_params: Option<Map<String, Value>>,

    /// Name of the registered definition this one extends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Registered ancestors, nearest first. Maintained by the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lineage: Vec<String>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn object(mut self, tag: impl Into<String>) -> Self {
        self.object = Some(tag.into());
        self
    }

    /// Set the discriminator. Non-object values are ignored.
    pub fn polymorphic(mut self, discriminator: Value) -> Self {
        if let Value::Object(map) = discriminator {
            self.polymorphic = Some(map);
        }
        self
    }

    pub fn endpoint(mut self, path: impl Into<String>) -> Self {
        self.endpoint = Some(path.into());
        self
    }

    pub fn default_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_params
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// The wire tag, falling back to the snake-cased name.
    pub fn tag(&self) -> String {
        self.object
            .clone()
            .unwrap_or_else(|| to_snake_case(&self.name))
    }

    /// The discriminator, or `None` when it is unset or empty.
    pub fn discriminator(&self) -> Option<&Map<String, Value>> {
        self.polymorphic.as_ref().filter(|m| !m.is_empty())
    }

    /// Same kind, or a registered descendant of `name`.
    pub fn is_a(&self, name: &str) -> bool {
        self.name == name || self.lineage.iter().any(|n| n == name)
    }

    /// Collection path for this kind: the endpoint override, or `/<tag>`
    /// pluralized with a trailing `s`.
    pub fn collection_path(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        let tag = self.tag();
        if tag.ends_with('s') {
            format!("/{}", tag)
        } else {
            format!("/{}s", tag)
        }
    }
}

/// A classified API error kind keyed by HTTP status.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorKindDef {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Value of `error_type` selecting this kind; defaults to the name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lineage: Vec<String>,
}

impl ErrorKindDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn discriminator_name(&self) -> &str {
        self.error_type.as_deref().unwrap_or(&self.name)
    }
}

/// A registry entry: either an entity kind or an error kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Entity(EntityDef),
    ErrorKind(ErrorKindDef),
}

impl Registration {
    pub fn name(&self) -> &str {
        match self {
            Registration::Entity(def) => &def.name,
            Registration::ErrorKind(def) => &def.name,
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            Registration::Entity(def) => def.parent.as_deref(),
            Registration::ErrorKind(def) => def.parent.as_deref(),
        }
    }
}

impl From<EntityDef> for Registration {
    fn from(def: EntityDef) -> Self {
        Registration::Entity(def)
    }
}

impl From<ErrorKindDef> for Registration {
    fn from(def: ErrorKindDef) -> Self {
        Registration::ErrorKind(def)
    }
}

/// Handle to an entity living in a session's object cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(pub(crate) usize);

/// Field value of a materialized entity. Nested payloads that resolved to an
/// entity are replaced by a handle to the cached instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Data>),
    Object(IndexMap<String, Data>),
    Entity(EntityKey),
}

impl Data {
    pub fn as_entity(&self) -> Option<EntityKey> {
        match self {
            Data::Entity(key) => Some(*key),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Data]> {
        match self {
            Data::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Data> {
        match self {
            Data::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Handles of every entity in this value, in order of appearance.
    pub fn entities(&self) -> Vec<EntityKey> {
        let mut out = Vec::new();
        self.collect_entities(&mut out);
        out
    }

    fn collect_entities(&self, out: &mut Vec<EntityKey>) {
        match self {
            Data::Entity(key) => out.push(*key),
            Data::Array(items) => items.iter().for_each(|d| d.collect_entities(out)),
            Data::Object(map) => map.values().for_each(|d| d.collect_entities(out)),
            _ => {}
        }
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Data::Null,
            Value::Bool(b) => Data::Bool(b),
            Value::Number(n) => Data::Number(n),
            Value::String(s) => Data::String(s),
            Value::Array(items) => Data::Array(items.into_iter().map(Data::from).collect()),
            Value::Object(map) => {
                Data::Object(map.into_iter().map(|(k, v)| (k, Data::from(v))).collect())
            }
        }
    }
}

/// A locally materialized entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub def: Arc<EntityDef>,
    pub fields: IndexMap<String, Data>,
}

impl Entity {
    pub fn new(def: Arc<EntityDef>) -> Self {
        Self {
            def,
            fields: IndexMap::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.def.name
    }

    pub fn get(&self, field: &str) -> Option<&Data> {
        self.fields.get(field)
    }

    pub fn id(&self) -> Option<Id> {
        match self.fields.get("id")? {
            Data::String(s) if !s.is_empty() => Some(s.clone()),
            Data::Number(n) => Some(n.to_string()),
            Data::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }
}

/// An argument to a mutation: plain fields, optionally tagged with the kind
/// they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub def: Option<Arc<EntityDef>>,
    pub fields: Map<String, Value>,
}

impl Record {
    /// Untyped fields. Anything but a JSON object is rejected.
    pub fn raw(fields: Value) -> Result<Self> {
        Ok(Self {
            def: None,
            fields: into_map(fields)?,
        })
    }

    pub fn typed(def: Arc<EntityDef>, fields: Value) -> Result<Self> {
        Ok(Self {
            def: Some(def),
            fields: into_map(fields)?,
        })
    }

    pub fn id(&self) -> Option<Id> {
        id_of(&self.fields)
    }

    pub fn id_value(&self) -> Option<&Value> {
        self.id().and(self.fields.get("id"))
    }
}

impl TryFrom<Value> for Record {
    type Error = ClientError;

    fn try_from(fields: Value) -> Result<Self> {
        Record::raw(fields)
    }
}

pub(crate) fn into_map(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ClientError::InvalidArgument(kind_name(&other).to_string())),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_path() {
        assert_eq!(EntityDef::new("Ticket").collection_path(), "/tickets");
        assert_eq!(EntityDef::new("Status").collection_path(), "/status");
        assert_eq!(
            EntityDef::new("Ticket").endpoint("/v2/issues").collection_path(),
            "/v2/issues"
        );
        assert_eq!(EntityDef::new("TicketComment").tag(), "ticket_comment");
    }

    #[test]
    fn test_empty_discriminator_is_none() {
        let def = EntityDef::new("Test").polymorphic(json!({}));
        assert!(def.discriminator().is_none());
        let def = EntityDef::new("Test").polymorphic(json!({"poly": true}));
        assert_eq!(def.discriminator().map(|m| m.len()), Some(1));
    }

    #[test]
    fn test_data_from_value_and_entities() {
        let data = Data::from(json!({"a": [1, {"b": "x"}], "c": null}));
        assert_eq!(data.get("c"), Some(&Data::Null));
        assert_eq!(
            data.get("a").and_then(|a| a.as_array()).map(|a| a.len()),
            Some(2)
        );

        let with_refs = Data::Array(vec![
            Data::Entity(EntityKey(3)),
            Data::Object([("x".to_string(), Data::Entity(EntityKey(1)))].into_iter().collect()),
        ]);
        assert_eq!(with_refs.entities(), vec![EntityKey(3), EntityKey(1)]);
    }

    #[test]
    fn test_record_id() {
        assert_eq!(Record::raw(json!({"id": 7})).unwrap().id().as_deref(), Some("7"));
        assert_eq!(Record::raw(json!({"id": 7})).unwrap().id_value(), Some(&json!(7)));
        assert!(Record::raw(json!({"test": 1})).unwrap().id().is_none());
    }

    #[test]
    fn test_record_rejects_non_objects() {
        let err = Record::raw(json!("nope")).unwrap_err();
        assert_eq!(err.to_string(), "expected a JSON object, got a string");
        assert!(matches!(
            Record::try_from(json!([{"title": "a"}])),
            Err(ClientError::InvalidArgument(_))
        ));
    }
}
