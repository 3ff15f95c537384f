//! Nested-bracket query parameter encoding.
//!
//! Structured values travel as flat bracket-suffixed keys:
//! `{a: {b: [1, 2]}}` becomes `a[b][0]=1&a[b][1]=2`.

use serde_json::{Map, Value};

use crate::model::common::display_value;

/// Flatten every object/array value of `map` into bracket-keyed leaves.
///
/// Scalars (including `null`) are kept as they are, in place. Empty nested
/// containers contribute nothing. Already flat maps come back unchanged.
pub fn flatten_nested(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => collapse(&mut out, &key, value),
            scalar => {
                out.insert(key, scalar);
            }
        }
    }
    out
}

fn collapse(out: &mut Map<String, Value>, prefix: &str, value: Value) {
    let children: Vec<(String, Value)> = match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        leaf => {
            out.insert(prefix.to_string(), leaf);
            return;
        }
    };

    for (segment, child) in children {
        collapse(out, &format!("{}[{}]", prefix, segment), child);
    }
}

/// Flatten a single named value, e.g. `fields` -> `fields[0]`, `fields[1]`.
pub fn flatten_key(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    flatten_nested(map)
}

/// Ordered query parameters; a key may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams(Vec<(String, String)>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Array values repeat the key once per element, in order; anything
    /// else is emitted once.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut params = Self::new();
        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    for item in items {
                        params.append(key.clone(), display_value(item));
                    }
                }
                other => params.append(key.clone(), display_value(other)),
            }
        }
        params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Unencoded `k=v&k=v` form, for logs and diagnostics.
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
