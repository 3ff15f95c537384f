use log::{debug, trace};
use serde_json::{Map, Value};

use crate::error::{ApiError, ClientError, Result};
use crate::logic::ingest::Ingestor;
use crate::logic::registry::{EntityRegistry, INTERNAL_SERVER_ERROR, UNKNOWN_RESPONSE};
use crate::model::{display_value, Data, LIST_OBJECT};
use crate::store::{HttpResponse, Method, ObjectCache};

/// A successfully resolved response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    One(Data),
    List(Vec<Data>),
}

impl Resolved {
    /// Every resolved value, a single one included
    pub fn into_vec(self) -> Vec<Data> {
        match self {
            Resolved::One(data) => vec![data],
            Resolved::List(items) => items,
        }
    }

    pub fn one(&self) -> Option<&Data> {
        match self {
            Resolved::One(data) => Some(data),
            Resolved::List(_) => None,
        }
    }
}

/// Turn a response into cached entities, or into a classified error.
///
/// Bodies that are not objects, or carry no `object` tag, fail as
/// `InternalServerError` (status 500) or `UnknownResponse`. A successful
/// DELETE also removes every returned entity from the cache.
pub fn resolve_response(
    registry: &EntityRegistry,
    cache: &mut ObjectCache,
    method: Method,
    response: HttpResponse,
) -> Result<Resolved> {
    let status = response.status;
    let success = response.is_success();

    let body = match response.body {
        Some(Value::Object(map)) => map,
        _ if status == 500 => {
            return Err(unclassified(registry, INTERNAL_SERVER_ERROR, status, "Internal server error", None))
        }
        _ => return Err(unclassified(registry, UNKNOWN_RESPONSE, status, "Unknown response", None)),
    };

    if !body.get("object").map_or(false, is_present) {
        return Err(unclassified(
            registry,
            UNKNOWN_RESPONSE,
            status,
            "Response missing \"object\" attribute",
            Some(Value::Object(body)),
        ));
    }

    if !success {
        return Err(classify(registry, status, body).into());
    }

    let resolved = {
        let mut ingestor = Ingestor::new(registry, cache);
        if body.get("object").and_then(Value::as_str) == Some(LIST_OBJECT) {
            let values = match body.get("values") {
                Some(Value::Array(values)) => values.clone(),
                _ => Vec::new(),
            };
            let mut items = Vec::with_capacity(values.len());
            for value in values {
                items.push(ingestor.to_model(value)?);
            }
            Resolved::List(items)
        } else {
            Resolved::One(ingestor.to_model(Value::Object(body))?)
        }
    };

    if method == Method::Delete {
        let removed = match &resolved {
            Resolved::One(data) => vec![data],
            Resolved::List(items) => items.iter().collect(),
        };
        for data in removed {
            evict(cache, data)?;
        }
    }

    Ok(resolved)
}

/// Classify an error body against the registered error kinds.
///
/// The body's discriminator fields are taken from the kind it resolves to,
/// if any, before `error_type` and `error_description` are read.
pub fn classify(registry: &EntityRegistry, status: u16, body: Map<String, Value>) -> ApiError {
    let mut fields = registry
        .resolve(&body)
        .and_then(|def| def.discriminator().cloned())
        .unwrap_or_default();
    fields.extend(body.clone());

    let error_type = fields.get("error_type").and_then(Value::as_str);
    let kind = registry.classify_error(status, error_type);
    let description = fields
        .get("error_description")
        .map(display_value)
        .unwrap_or_default();

    debug!("{} response classified as {}", status, kind.name);

    let lineage = std::iter::once(kind.name.clone())
        .chain(kind.lineage.iter().cloned())
        .collect();
    ApiError::new(kind.name.clone(), lineage, Some(status), description, Some(Value::Object(body)))
}

fn unclassified(
    registry: &EntityRegistry,
    name: &str,
    status: u16,
    description: &str,
    data: Option<Value>,
) -> ClientError {
    let kind = registry.named_error_kind(name);
    let lineage = std::iter::once(kind.name.clone())
        .chain(kind.lineage.iter().cloned())
        .collect();
    ApiError::new(kind.name.clone(), lineage, Some(status), description, data).into()
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Drop a deleted entity from the cache, with cascading unlinking.
fn evict(cache: &mut ObjectCache, data: &Data) -> Result<()> {
    let Some(key) = data.as_entity() else {
        return Ok(());
    };
    let Some(id) = cache.get(key).and_then(|e| e.id()) else {
        return Ok(());
    };

    if cache.lookup(&id) == Some(key) {
        trace!("evicting deleted {}", id);
        cache.remove(&id)?;
    }
    Ok(())
}
