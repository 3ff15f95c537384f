use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use log::trace;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::logic::registry::EntityRegistry;
use crate::model::{id_of, Data, Entity, EntityDef, EntityKey, Id};
use crate::store::{BackRef, ObjectCache, PathSeg};

/// Turns raw payloads into cached entities.
///
/// Nested objects that resolve to a registered kind are materialized
/// themselves and replaced by a handle; every such link is recorded as a
/// back-reference on the nested entity's cache entry.
pub struct Ingestor<'a> {
    registry: &'a EntityRegistry,
    cache: &'a mut ObjectCache,
    /// Ids whose fields are currently being assigned
    in_progress: HashSet<Id>,
}

impl<'a> Ingestor<'a> {
    pub fn new(registry: &'a EntityRegistry, cache: &'a mut ObjectCache) -> Self {
        Self {
            registry,
            cache,
            in_progress: HashSet::new(),
        }
    }

    /// Resolve a top-level value. Payloads of unknown kinds are kept raw.
    pub fn to_model(&mut self, value: Value) -> Result<Data> {
        match value {
            Value::Object(map) => match self.registry.resolve(&map) {
                Some(def) => Ok(Data::Entity(self.materialize(def, map)?)),
                None => Ok(Data::Object(
                    map.into_iter().map(|(k, v)| (k, Data::from(v))).collect(),
                )),
            },
            other => Ok(Data::from(other)),
        }
    }

    /// Construct an entity of kind `def` from `payload`.
    ///
    /// A payload whose id is already cached is merged onto the cached
    /// instance, which is returned. Otherwise a new instance is allocated,
    /// seeded with the kind's discriminator, and cached when it has an id.
    pub fn materialize(&mut self, def: Arc<EntityDef>, payload: Map<String, Value>) -> Result<EntityKey> {
        let id = id_of(&payload);

        let cached = id.as_deref().and_then(|id| self.cache.lookup(id));
        if let Some(key) = cached {
            if id.as_ref().map_or(false, |id| self.in_progress.contains(id)) {
                // Reached again through its own fields; link only
                return Ok(key);
            }
            self.assign(key, id, payload)?;
            return Ok(key);
        }

        let mut entity = Entity::new(Arc::clone(&def));
        if let Some(discriminator) = def.discriminator() {
            for (field, value) in discriminator {
                entity.fields.insert(field.clone(), Data::from(value.clone()));
            }
        }

        let key = self.cache.insert(entity);
        if let Some(id) = &id {
            self.cache.put(id, key)?;
        }
        trace!("materialized {} {:?} as {:?}", def.name, id, key);

        self.assign(key, id, payload)?;
        Ok(key)
    }

    /// Assign raw fields onto the entity behind `key`, resolving nested
    /// payloads on the way.
    pub fn assign(&mut self, key: EntityKey, id: Option<Id>, payload: Map<String, Value>) -> Result<()> {
        if let Some(id) = &id {
            self.in_progress.insert(id.clone());
        }

        let mut fields = IndexMap::with_capacity(payload.len());
        for (name, value) in payload {
            let data = self.convert(key, vec![PathSeg::Field(name.clone())], value)?;
            fields.insert(name, data);
        }
        self.cache.merge(key, fields);

        if let Some(id) = &id {
            self.in_progress.remove(id);
        }
        Ok(())
    }

    fn convert(&mut self, owner: EntityKey, path: Vec<PathSeg>, value: Value) -> Result<Data> {
        match value {
            Value::Object(map) => {
                if let Some(def) = self.registry.resolve(&map) {
                    let id = id_of(&map);
                    let child = self.materialize(def, map)?;
                    if let Some(id) = id {
                        self.cache.add_back_reference(&id, BackRef { owner, path });
                    }
                    return Ok(Data::Entity(child));
                }

                let mut out = IndexMap::with_capacity(map.len());
                for (name, child) in map {
                    let mut child_path = path.clone();
                    child_path.push(PathSeg::Field(name.clone()));
                    out.insert(name, self.convert(owner, child_path, child)?);
                }
                Ok(Data::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let mut child_path = path.clone();
                    child_path.push(PathSeg::Index(index));
                    out.push(self.convert(owner, child_path, item)?);
                }
                Ok(Data::Array(out))
            }
            scalar => Ok(Data::from(scalar)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        for name in ["Model1", "Model2", "Model3"] {
            registry.register(EntityDef::new(name)).unwrap();
        }
        registry
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_unknown_nested_object_stays_raw() {
        let registry = registry();
        let mut cache = ObjectCache::new();
        let def = registry.require("Model1").unwrap();

        let key = Ingestor::new(&registry, &mut cache)
            .materialize(def, map(json!({"nested": {"object": "unknown"}})))
            .unwrap();

        let nested = cache.get(key).unwrap().get("nested").unwrap();
        assert_eq!(nested.get("object"), Some(&Data::String("unknown".into())));
    }

    #[test]
    fn test_nested_known_objects_become_entities() {
        let registry = registry();
        let mut cache = ObjectCache::new();

        let root = Ingestor::new(&registry, &mut cache)
            .to_model(json!({
                "object": "model3",
                "nested": {"object": "model1", "list": [{"object": "model2", "id": "m2"}]}
            }))
            .unwrap();

        let root = cache.get(root.as_entity().unwrap()).unwrap();
        let nested_key = root.get("nested").and_then(Data::as_entity).unwrap();
        let nested = cache.get(nested_key).unwrap();
        assert_eq!(nested.kind(), "Model1");

        let list = nested.get("list").and_then(Data::as_array).unwrap();
        let m2 = cache.get(list[0].as_entity().unwrap()).unwrap();
        assert_eq!(m2.kind(), "Model2");

        // m2 is linked from Model1's list
        let refs = cache.back_references("m2");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].owner, nested_key);
        assert_eq!(
            refs[0].path,
            vec![PathSeg::Field("list".into()), PathSeg::Index(0)]
        );
    }

    #[test]
    fn test_identity_is_stable_across_ingestions() {
        let registry = registry();
        let mut cache = ObjectCache::new();
        let def = registry.require("Model1").unwrap();

        let (first, second) = {
            let mut ingestor = Ingestor::new(&registry, &mut cache);
            let first = ingestor
                .materialize(Arc::clone(&def), map(json!({"id": 1, "title": "old"})))
                .unwrap();
            let second = ingestor
                .materialize(def, map(json!({"id": 1, "title": "new", "extra": true})))
                .unwrap();
            (first, second)
        };

        assert_eq!(first, second);
        let entity = cache.get(first).unwrap();
        assert_eq!(entity.get("title"), Some(&Data::String("new".into())));
        assert_eq!(entity.get("extra"), Some(&Data::Bool(true)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_self_reference_links_without_recursing() {
        let registry = registry();
        let mut cache = ObjectCache::new();

        let key = Ingestor::new(&registry, &mut cache)
            .to_model(json!({
                "object": "model1",
                "id": "a",
                "child": {
                    "object": "model2",
                    "id": "b",
                    "parent": {"object": "model1", "id": "a", "title": "ignored"}
                }
            }))
            .unwrap()
            .as_entity()
            .unwrap();

        let a = cache.get(key).unwrap();
        let b = cache.get(a.get("child").and_then(Data::as_entity).unwrap()).unwrap();
        assert_eq!(b.get("parent").and_then(Data::as_entity), Some(key));
        assert!(a.get("title").is_none());
        assert_eq!(cache.back_references("a").len(), 1);
    }

    #[test]
    fn test_discriminator_seeds_fields() {
        let mut registry = EntityRegistry::new();
        registry
            .register(EntityDef::new("PolyModel").polymorphic(json!({"poly": true})))
            .unwrap();
        let def = registry.require("PolyModel").unwrap();
        let mut cache = ObjectCache::new();

        let key = Ingestor::new(&registry, &mut cache)
            .materialize(def, map(json!({"id": 3})))
            .unwrap();

        let keys: Vec<&String> = cache.get(key).unwrap().fields.keys().collect();
        assert_eq!(keys, vec!["poly", "id"]);
    }
}
