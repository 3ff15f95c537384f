use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};
use crate::model::common::{matches_discriminator, to_snake_case};
use crate::model::{EntityDef, ErrorKindDef, Registration};

/// Name of the root error kind every other kind descends from
pub const GENERIC_ERROR: &str = "ApiError";
pub const UNKNOWN_RESPONSE: &str = "UnknownResponse";
pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";

/// Entity and error-kind definitions known to one session.
///
/// Definitions are kept in registration order; polymorphic resolution and
/// error classification both depend on it for tie-breaks.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    entities: Vec<Arc<EntityDef>>,
    error_kinds: Vec<Arc<ErrorKindDef>>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    /// A registry seeded with the built-in error kinds.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for kind in builtin_error_kinds() {
            // Built-ins are declared parents first, so this cannot fail.
            if let Err(err) = registry.register_error_kind(kind) {
                warn!("skipping built-in error kind: {}", err);
            }
        }
        registry
    }

    /// A registry with no definitions at all.
    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
            error_kinds: Vec::new(),
        }
    }

    pub fn register(&mut self, registration: impl Into<Registration>) -> Result<()> {
        match registration.into() {
            Registration::Entity(def) => self.register_entity(def).map(|_| ()),
            Registration::ErrorKind(def) => self.register_error_kind(def).map(|_| ()),
        }
    }

    /// Register a batch in any order; parents are registered before the
    /// definitions extending them.
    pub fn register_all<I, R>(&mut self, registrations: I) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: Into<Registration>,
    {
        let mut pending: Vec<Registration> = registrations.into_iter().map(Into::into).collect();

        while !pending.is_empty() {
            let ready = pending.iter().position(|r| match r.parent() {
                None => true,
                Some(parent) => match r {
                    Registration::Entity(_) => self.entity(parent).is_some(),
                    Registration::ErrorKind(_) => self.error_kind(parent).is_some(),
                },
            });

            match ready {
                Some(index) => {
                    let registration = pending.remove(index);
                    self.register(registration)?;
                }
                // Nothing left can be satisfied; surface the first failure.
                None => return self.register(pending.remove(0)),
            }
        }

        Ok(())
    }

    pub fn register_entity(&mut self, mut def: EntityDef) -> Result<Arc<EntityDef>> {
        def.lineage.clear();

        if let Some(parent_name) = def.parent.clone() {
            let parent = self
                .entity(&parent_name)
                .ok_or_else(|| ClientError::UnknownParent {
                    name: def.name.clone(),
                    parent: parent_name.clone(),
                })?;

            if def.object.is_none() {
                def.object = parent.object.clone();
            }
            if def.polymorphic.is_none() {
                def.polymorphic = parent.polymorphic.clone();
            }
            if def.endpoint.is_none() {
                def.endpoint = parent.endpoint.clone();
            }
            if def.default_params.is_none() {
                def.default_params = parent.default_params.clone();
            }
            def.lineage = std::iter::once(parent.name.clone())
                .chain(parent.lineage.iter().cloned())
                .collect();
        }

        if def.object.is_none() {
            def.object = Some(to_snake_case(&def.name));
        }

        if def.discriminator().is_none() {
            let tag = def.tag();
            if let Some(existing) = self
                .entities
                .iter()
                .find(|e| e.name != def.name && e.tag() == tag && e.discriminator().is_none())
            {
                return Err(ClientError::DuplicateBaseKind {
                    name: def.name.clone(),
                    existing: existing.name.clone(),
                    tag,
                });
            }
        }

        debug!("registered entity {} as '{}'", def.name, def.tag());

        let def = Arc::new(def);
        match self.entities.iter().position(|e| e.name == def.name) {
            Some(index) => self.entities[index] = Arc::clone(&def),
            None => self.entities.push(Arc::clone(&def)),
        }
        Ok(def)
    }

    pub fn register_error_kind(&mut self, mut def: ErrorKindDef) -> Result<Arc<ErrorKindDef>> {
        def.lineage.clear();

        if let Some(parent_name) = def.parent.clone() {
            let parent = self
                .error_kind(&parent_name)
                .ok_or_else(|| ClientError::UnknownParent {
                    name: def.name.clone(),
                    parent: parent_name.clone(),
                })?;

            if def.status.is_none() {
                def.status = parent.status;
            }
            def.lineage = std::iter::once(parent.name.clone())
                .chain(parent.lineage.iter().cloned())
                .collect();
        }

        debug!("registered error kind {} ({:?})", def.name, def.status);

        let def = Arc::new(def);
        match self.error_kinds.iter().position(|e| e.name == def.name) {
            Some(index) => self.error_kinds[index] = Arc::clone(&def),
            None => self.error_kinds.push(Arc::clone(&def)),
        }
        Ok(def)
    }

    pub fn entity(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.entities.iter().find(|e| e.name == name).cloned()
    }

    /// Like [`entity`](Self::entity) but failing with `UnknownKind`.
    pub fn require(&self, name: &str) -> Result<Arc<EntityDef>> {
        self.entity(name)
            .ok_or_else(|| ClientError::UnknownKind(name.to_string()))
    }

    pub fn error_kind(&self, name: &str) -> Option<Arc<ErrorKindDef>> {
        self.error_kinds.iter().find(|e| e.name == name).cloned()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.iter()
    }

    pub fn error_kinds(&self) -> impl Iterator<Item = &Arc<ErrorKindDef>> {
        self.error_kinds.iter()
    }

    /// Find the entity kind a raw payload belongs to.
    ///
    /// Candidates are the definitions whose tag equals `payload.object`.
    /// Among those whose discriminator matches the payload, the one matching
    /// the most discriminator fields wins, later registrations winning ties.
    /// Without a match the base (discriminator-less) definition is used, and
    /// failing that the first registered candidate. `None` means no
    /// definition carries the tag; callers keep the raw payload.
    pub fn resolve(&self, payload: &Map<String, Value>) -> Option<Arc<EntityDef>> {
        let tag = payload.get("object")?.as_str()?;
        let candidates: Vec<&Arc<EntityDef>> =
            self.entities.iter().filter(|e| e.tag() == tag).collect();

        if candidates.is_empty() {
            return None;
        }

        let matched: Vec<&&Arc<EntityDef>> = candidates
            .iter()
            .filter(|e| {
                e.discriminator()
                    .map_or(false, |d| matches_discriminator(d, payload))
            })
            .collect();

        let best = matched
            .iter()
            .enumerate()
            .max_by_key(|(i, e)| (e.discriminator().map_or(0, Map::len), *i))
            .map(|(_, e)| Arc::clone(e));

        if let Some(best) = best {
            if matched.len() > 1 {
                debug!(
                    "{} kinds match '{}' payload, picked {}",
                    matched.len(),
                    tag,
                    best.name
                );
            }
            return Some(best);
        }

        if let Some(base) = candidates.iter().find(|e| e.discriminator().is_none()) {
            return Some(Arc::clone(base));
        }

        warn!(
            "no discriminator matches '{}' payload, falling back to {}",
            tag, candidates[0].name
        );
        Some(Arc::clone(candidates[0]))
    }

    /// Pick the error kind for a failed response.
    ///
    /// An exact `error_type` match among the kinds declaring `status` wins;
    /// otherwise the broadest kind for that status; otherwise the generic
    /// root kind.
    pub fn classify_error(&self, status: u16, error_type: Option<&str>) -> Arc<ErrorKindDef> {
        let for_status: Vec<&Arc<ErrorKindDef>> = self
            .error_kinds
            .iter()
            .filter(|k| k.status == Some(status))
            .collect();

        if let Some(error_type) = error_type {
            if let Some(exact) = for_status
                .iter()
                .find(|k| k.discriminator_name() == error_type)
            {
                return Arc::clone(exact);
            }
        }

        for_status
            .iter()
            .min_by_key(|k| k.lineage.len())
            .map(|k| Arc::clone(k))
            .unwrap_or_else(|| self.named_error_kind(GENERIC_ERROR))
    }

    /// A registered error kind by name, or an unregistered stand-in.
    pub fn named_error_kind(&self, name: &str) -> Arc<ErrorKindDef> {
        self.error_kind(name)
            .unwrap_or_else(|| Arc::new(ErrorKindDef::new(name)))
    }
}

fn builtin_error_kinds() -> Vec<ErrorKindDef> {
    vec![
        ErrorKindDef::new(GENERIC_ERROR),
        ErrorKindDef::new(UNKNOWN_RESPONSE).extends(GENERIC_ERROR),
        ErrorKindDef::new("BadRequest").status(400).extends(GENERIC_ERROR),
        ErrorKindDef::new("InvalidAttributes").status(400).extends("BadRequest"),
        ErrorKindDef::new("Unauthorized").status(401).extends(GENERIC_ERROR),
        ErrorKindDef::new("Forbidden").status(403).extends(GENERIC_ERROR),
        ErrorKindDef::new("NotFound").status(404).extends(GENERIC_ERROR),
        ErrorKindDef::new("TooManyRequests").status(429).extends(GENERIC_ERROR),
        ErrorKindDef::new(INTERNAL_SERVER_ERROR).status(500).extends(GENERIC_ERROR),
        ErrorKindDef::new("ServiceUnavailable").status(503).extends(GENERIC_ERROR),
    ]
}
