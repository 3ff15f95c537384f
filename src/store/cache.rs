use std::collections::HashMap;

use indexmap::IndexMap;
use log::{trace, warn};

use crate::error::{ClientError, Result};
use crate::model::{Data, Entity, EntityKey, Id};

/// One step into an entity's field tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSeg {
    Field(String),
    Index(usize),
}

/// Where a cached entity is nested: a location inside another entity's
/// fields. The last segment is the field name or array index holding the
/// link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackRef {
    pub owner: EntityKey,
    pub path: Vec<PathSeg>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: EntityKey,
    refs: Vec<BackRef>,
}

/// Per-session entity arena plus identity map.
///
/// Every materialized entity gets a slot in the arena. Entities carrying an
/// id are additionally indexed by it, at most once, together with every
/// distinct location they have been nested at.
///
/// Keys are never reused. A slot is freed by `remove` (indexed entities),
/// `release` (entities without an id) or `clear`.
#[derive(Debug, Default)]
pub struct ObjectCache {
    slots: HashMap<EntityKey, Entity>,
    next: usize,
    index: HashMap<Id, CacheEntry>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an arena slot. The entity is not indexed by id.
    pub fn insert(&mut self, entity: Entity) -> EntityKey {
        let key = EntityKey(self.next);
        self.next += 1;
        self.slots.insert(key, entity);
        key
    }

    pub fn get(&self, key: EntityKey) -> Option<&Entity> {
        self.slots.get(&key)
    }

    pub fn get_mut(&mut self, key: EntityKey) -> Option<&mut Entity> {
        self.slots.get_mut(&key)
    }

    /// The live instance cached under `id`
    pub fn lookup(&self, id: &str) -> Option<EntityKey> {
        self.index.get(id).map(|entry| entry.key)
    }

    /// Index `key` under `id`. Empty ids are ignored (`Ok(false)`); an id
    /// that is already cached is rejected, callers merge into the existing
    /// instance instead.
    pub fn put(&mut self, id: &str, key: EntityKey) -> Result<bool> {
        if id.is_empty() {
            return Ok(false);
        }
        if self.index.contains_key(id) {
            return Err(ClientError::AlreadyCached(id.to_string()));
        }

        trace!("caching {} as {:?}", id, key);
        self.index.insert(
            id.to_string(),
            CacheEntry {
                key,
                refs: Vec::new(),
            },
        );
        Ok(true)
    }

    /// Assign fields onto an existing instance, keeping its identity.
    pub fn merge(&mut self, key: EntityKey, fields: IndexMap<String, Data>) -> bool {
        match self.get_mut(key) {
            Some(entity) => {
                entity.fields.extend(fields);
                true
            }
            None => false,
        }
    }

    /// Record that the entity cached under `id` is nested at `back_ref`.
    /// Unknown ids are ignored, since population order is not guaranteed.
    /// A location already recorded is kept once.
    pub fn add_back_reference(&mut self, id: &str, back_ref: BackRef) -> bool {
        match self.index.get_mut(id) {
            Some(entry) => {
                if !entry.refs.contains(&back_ref) {
                    entry.refs.push(back_ref);
                }
                true
            }
            None => {
                trace!("no cache entry for {}, dropping back-reference", id);
                false
            }
        }
    }

    pub fn back_references(&self, id: &str) -> &[BackRef] {
        self.index
            .get(id)
            .map(|entry| entry.refs.as_slice())
            .unwrap_or_default()
    }

    /// Remove the entity cached under `id` and unlink it from every place it
    /// was nested. Removing an id that is not cached is an error.
    pub fn remove(&mut self, id: &str) -> Result<EntityKey> {
        let entry = self
            .index
            .remove(id)
            .ok_or_else(|| ClientError::NotCached(id.to_string()))?;

        for back_ref in &entry.refs {
            self.unlink(back_ref, entry.key);
        }

        self.forget_owner(entry.key);
        self.slots.remove(&entry.key);

        trace!("removed {} ({} back-references)", id, entry.refs.len());
        Ok(entry.key)
    }

    /// Free the slot of an entity that is not indexed by id. Indexed
    /// entities are left alone; use `remove` for those.
    pub fn release(&mut self, key: EntityKey) -> Option<Entity> {
        let indexed = self
            .get(key)
            .and_then(Entity::id)
            .map_or(false, |id| self.lookup(&id) == Some(key));
        if indexed {
            return None;
        }

        let entity = self.slots.remove(&key)?;
        self.forget_owner(key);
        Some(entity)
    }

    // Links held by a dropped entity are gone with it
    fn forget_owner(&mut self, owner: EntityKey) {
        for other in self.index.values_mut() {
            other.refs.retain(|r| r.owner != owner);
        }
    }

    fn unlink(&mut self, back_ref: &BackRef, removed: EntityKey) {
        let Some(owner) = self.get_mut(back_ref.owner) else {
            return;
        };
        let Some((last, parents)) = back_ref.path.split_last() else {
            return;
        };

        let target = Data::Entity(removed);
        let unlinked = if parents.is_empty() {
            match last {
                PathSeg::Field(name) if owner.fields.get(name) == Some(&target) => {
                    owner.fields.shift_remove(name);
                    true
                }
                _ => false,
            }
        } else {
            match (navigate(&mut owner.fields, parents), last) {
                (Some(Data::Object(map)), PathSeg::Field(name)) if map.get(name) == Some(&target) => {
                    map.shift_remove(name);
                    true
                }
                // Earlier splices may have shifted indices; drop by identity
                (Some(Data::Array(items)), PathSeg::Index(_)) => {
                    let before = items.len();
                    items.retain(|d| d != &target);
                    items.len() != before
                }
                _ => false,
            }
        };

        if !unlinked {
            warn!("stale back-reference {:?} for {:?}", back_ref, removed);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Live arena slots, indexed or not
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.index.keys()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }
}

fn navigate<'a>(fields: &'a mut IndexMap<String, Data>, path: &[PathSeg]) -> Option<&'a mut Data> {
    let (first, rest) = path.split_first()?;
    let mut current = match first {
        PathSeg::Field(name) => fields.get_mut(name)?,
        PathSeg::Index(_) => return None,
    };

    for segment in rest {
        current = match (current, segment) {
            (Data::Object(map), PathSeg::Field(name)) => map.get_mut(name)?,
            (Data::Array(items), PathSeg::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}
