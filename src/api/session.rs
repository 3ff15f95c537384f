use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::logic::{resolve_response, EntityRegistry, Ingestor, Query, RequestPlan, Resolved};
use crate::model::entity::into_map;
use crate::model::{Data, Entity, EntityDef, EntityKey, Record, Registration};
use crate::store::{BasicAuth, HttpRequest, ObjectCache, ReqwestTransport, Transport};

/// A client session: one registry, one object cache, one transport.
///
/// Entities materialized through a session are only ever cached there.
/// Sessions are not meant to be shared between concurrent tasks; every
/// operation touching the cache takes `&mut self`.
///
/// The cache grows with every distinct entity resolved. Entities without an
/// id stay until they are released or the session is dropped.
pub struct Session {
    config: ClientConfig,
    registry: EntityRegistry,
    cache: ObjectCache,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub fn new(config: ClientConfig, registry: EntityRegistry, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            registry,
            cache: ObjectCache::new(),
            transport,
        }
    }

    /// A session over the reqwest transport with only the built-in error
    /// kinds registered.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.http)?;
        Ok(Self::new(config, EntityRegistry::new(), Arc::new(transport)))
    }

    /// A new session sharing this one's registrations and transport, with
    /// an empty cache.
    ///
    /// `api_key` and `api_url` override this session's when given. Headers
    /// are layered on top of this session's headers.
    pub fn fork(
        &self,
        api_key: Option<String>,
        api_url: Option<String>,
        headers: BTreeMap<String, String>,
    ) -> Session {
        let mut config = self.config.clone();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            config.api.key = Some(key);
        }
        if let Some(url) = api_url.filter(|u| !u.is_empty()) {
            config.api.url = url;
        }
        config.headers.extend(headers);

        Session::new(config, self.registry.clone(), Arc::clone(&self.transport))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api_url(&self) -> &str {
        &self.config.api.url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.config.api.key.as_deref()
    }

    pub fn default_headers(&self) -> &BTreeMap<String, String> {
        &self.config.headers
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn register(&mut self, registration: impl Into<Registration>) -> Result<()> {
        self.registry.register(registration)
    }

    pub fn register_all<I, R>(&mut self, registrations: I) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: Into<Registration>,
    {
        self.registry.register_all(registrations)
    }

    pub fn kind(&self, name: &str) -> Result<Arc<EntityDef>> {
        self.registry.require(name)
    }

    /// A query for `kind`, filtered on its discriminator.
    pub fn query(&self, kind: &str) -> Result<Query> {
        Ok(Query::scoped(self.kind(kind)?))
    }

    /// A query with no bound kind
    pub fn request(&self) -> Query {
        Query::new()
    }

    /// Construct a local entity of `kind`. Known ids are merged onto the
    /// cached instance.
    pub fn build(&mut self, kind: &str, fields: Value) -> Result<EntityKey> {
        let def = self.kind(kind)?;
        let fields = into_map(fields)?;
        Ingestor::new(&self.registry, &mut self.cache).materialize(def, fields)
    }

    /// Resolve a raw payload the way a response body would be.
    pub fn to_model(&mut self, value: Value) -> Result<Data> {
        Ingestor::new(&self.registry, &mut self.cache).to_model(value)
    }

    pub fn entity(&self, key: EntityKey) -> Option<&Entity> {
        self.cache.get(key)
    }

    pub fn lookup(&self, id: &str) -> Option<EntityKey> {
        self.cache.lookup(id)
    }

    /// Plain JSON for `data`, nested entities expanded.
    ///
    /// An entity reached again while it is being expanded renders as
    /// `{object, id}`. Removed entities render as `null`.
    pub fn to_json(&self, data: &Data) -> Value {
        let mut expanding = HashSet::new();
        self.render(data, &mut expanding)
    }

    fn render(&self, data: &Data, expanding: &mut HashSet<EntityKey>) -> Value {
        match data {
            Data::Null => Value::Null,
            Data::Bool(b) => Value::Bool(*b),
            Data::Number(n) => Value::Number(n.clone()),
            Data::String(s) => Value::String(s.clone()),
            Data::Array(items) => Value::Array(items.iter().map(|d| self.render(d, expanding)).collect()),
            Data::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render(v, expanding)))
                    .collect(),
            ),
            Data::Entity(key) => {
                let Some(entity) = self.cache.get(*key) else {
                    return Value::Null;
                };

                if !expanding.insert(*key) {
                    let mut stub = Map::new();
                    stub.insert("object".to_string(), entity.def.tag().into());
                    if let Some(id) = entity.fields.get("id") {
                        stub.insert("id".to_string(), self.render(id, expanding));
                    }
                    return Value::Object(stub);
                }

                let fields = entity
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.render(v, expanding)))
                    .collect();
                expanding.remove(key);
                Value::Object(fields)
            }
        }
    }

    /// A snapshot of the entity usable as a mutation argument.
    pub fn record(&self, key: EntityKey) -> Option<Record> {
        let entity = self.cache.get(key)?;
        Record::typed(Arc::clone(&entity.def), self.to_json(&Data::Entity(key))).ok()
    }

    /// Drop the entity from the cache and from every place it is nested.
    pub fn remove(&mut self, key: EntityKey) -> Result<()> {
        let id = self
            .cache
            .get(key)
            .and_then(Entity::id)
            .ok_or_else(|| ClientError::NotCached(format!("{:?}", key)))?;
        self.cache.remove(&id).map(|_| ())
    }

    /// Free an entity that has no id, such as a resolved payload that was
    /// never persisted. Returns `None` for entities indexed by id.
    pub fn release(&mut self, key: EntityKey) -> Option<Entity> {
        self.cache.release(key)
    }

    /// Execute a request plan and resolve its response.
    pub async fn send(&mut self, plan: RequestPlan) -> Result<Resolved> {
        let url = self.config.endpoint_url(&plan.full_path());

        let key = self.config.api.key.clone().filter(|k| !k.is_empty());
        let pass = self.config.api.pass.clone().filter(|p| !p.is_empty());
        let auth = if key.is_some() || pass.is_some() {
            Some(BasicAuth {
                username: key.unwrap_or_default(),
                password: pass.unwrap_or_default(),
            })
        } else {
            None
        };

        let request = HttpRequest {
            method: plan.method,
            url,
            params: plan.params,
            headers: self
                .config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            auth,
            body: plan.body,
        };

        debug!(
            "{} {} ?{}",
            request.method,
            request.url,
            request.params.to_query_string()
        );

        let response = self.transport.send(request).await?;
        resolve_response(&self.registry, &mut self.cache, plan.method, response)
    }

    pub async fn get(&mut self, kind: &str, id: &str) -> Result<Resolved> {
        let plan = Query::of(self.kind(kind)?).get(id)?;
        self.send(plan).await
    }

    pub async fn all(&mut self, kind: &str) -> Result<Resolved> {
        let plan = self.query(kind)?.all()?;
        self.send(plan).await
    }

    /// Create one entity from an object, or a batch from an array of
    /// objects.
    pub async fn create(&mut self, kind: &str, fields: Value) -> Result<Resolved> {
        let query = Query::of(self.kind(kind)?);
        let plan = match fields {
            Value::Array(items) => {
                let records = items.into_iter().map(Record::raw).collect::<Result<Vec<_>>>()?;
                query.create_many(records)?
            }
            fields => query.create(Record::raw(fields)?)?,
        };
        self.send(plan).await
    }

    /// Send `updates` for a cached entity; the response is merged back onto
    /// the same instance.
    pub async fn update_entity(&mut self, key: EntityKey, updates: Value) -> Result<Resolved> {
        let record = self.snapshot(key)?;
        let def = self.snapshot_def(&record)?;
        let plan = Query::of(def).update_one(record, updates)?;
        self.send(plan).await
    }

    /// Delete a cached entity remotely, then locally.
    pub async fn delete_entity(&mut self, key: EntityKey) -> Result<Resolved> {
        let record = self.snapshot(key)?;
        let def = self.snapshot_def(&record)?;
        let id = record.id();
        let plan = Query::of(def).delete_one(record)?;
        let resolved = self.send(plan).await?;

        // Servers answering a delete with a different payload still drop it
        if let Some(id) = id {
            if self.cache.lookup(&id) == Some(key) {
                self.cache.remove(&id)?;
            }
        }
        Ok(resolved)
    }

    fn snapshot(&self, key: EntityKey) -> Result<Record> {
        self.record(key)
            .ok_or_else(|| ClientError::NotCached(format!("{:?}", key)))
    }

    fn snapshot_def(&self, record: &Record) -> Result<Arc<EntityDef>> {
        record.def.clone().ok_or(ClientError::MissingObjectType)
    }
}
