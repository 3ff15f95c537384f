use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};
use crate::model::entity::kind_name;
use crate::model::Predicate;

/// One argument to `filter_by`: a predicate, or a plain key/value map.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArg {
    Predicate(Predicate),
    Map(Map<String, Value>),
    /// A JSON value that is not an object; adding it fails
    Invalid(Value),
}

impl FilterArg {
    fn into_entries(self) -> Result<Vec<(String, Value)>> {
        match self {
            FilterArg::Predicate(p) => {
                let (key, value) = p.to_filter_entry();
                Ok(vec![(key, Value::String(value))])
            }
            FilterArg::Map(map) => Ok(map.into_iter().collect()),
            FilterArg::Invalid(value) => Err(ClientError::InvalidArgument(kind_name(&value).to_string())),
        }
    }
}

impl From<Predicate> for FilterArg {
    fn from(p: Predicate) -> Self {
        FilterArg::Predicate(p)
    }
}

impl From<Map<String, Value>> for FilterArg {
    fn from(map: Map<String, Value>) -> Self {
        FilterArg::Map(map)
    }
}

impl From<Value> for FilterArg {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => FilterArg::Map(map),
            other => FilterArg::Invalid(other),
        }
    }
}

/// Structured `key=value` filters. Values accumulate per key in insertion
/// order and are sent as repeated parameters, which the API ANDs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    entries: IndexMap<String, Vec<Value>>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, arg: impl Into<FilterArg>) -> Result<()> {
        for (key, value) in arg.into().into_entries()? {
            self.entries.entry(key).or_default().push(value);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&[Value]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
        self.entries.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::Array(v.clone())))
                .collect(),
        )
    }
}
