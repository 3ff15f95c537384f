use std::sync::Arc;

use itertools::Itertools;
use serde_json::{json, Map, Value};

use crate::error::{ClientError, Result};
use crate::model::{
    flatten_key, flatten_nested, EntityDef, Expr, Field, FilterArg, Filters, Id, Record,
    SearchParams, LIST_OBJECT,
};
use crate::model::entity::into_map;
use crate::store::Method;

/// A fully rendered request, ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPlan {
    pub method: Method,
    /// Collection path, without the id
    pub path: String,
    pub id: Option<Id>,
    pub params: SearchParams,
    pub body: Option<Value>,
    /// Kind the request was built for
    pub def: Arc<EntityDef>,
}

impl RequestPlan {
    /// The path including the id segment, if any
    pub fn full_path(&self) -> String {
        match &self.id {
            Some(id) => format!("{}/{}", self.path, id),
            None => self.path.clone(),
        }
    }
}

/// Accumulated state of one query against a single entity kind.
#[derive(Debug, Clone, Default)]
pub struct Query {
    def: Option<Arc<EntityDef>>,
    path: Option<String>,
    filters: Filters,
    expressions: Vec<Expr>,
    fields: Vec<Field>,
    group_by: Vec<Field>,
    order_by: Vec<Field>,
    limit: Option<u64>,
    offset: Option<u64>,
    /// First rejected `filter_by` argument, reported by the terminal call
    rejected: Option<String>,
}

impl Query {
    /// A query without a bound kind. The kind is inferred from `select` or
    /// from the first typed mutation argument.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(def: Arc<EntityDef>) -> Self {
        Self {
            def: Some(def),
            ..Default::default()
        }
    }

    /// A query bound to `def` that only matches payloads carrying its
    /// discriminator.
    pub fn scoped(def: Arc<EntityDef>) -> Self {
        let discriminator = def.discriminator().cloned();
        let query = Self::of(def);
        match discriminator {
            Some(map) => query.filter_by(map),
            None => query,
        }
    }

    pub fn def(&self) -> Option<&Arc<EntityDef>> {
        self.def.as_ref()
    }

    /// Send to `path` instead of the kind's collection path
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add structured filters. Values for a key accumulate, never replace.
    ///
    /// An argument that is not a predicate or an object fails the request
    /// when it is planned.
    pub fn filter_by(mut self, arg: impl Into<FilterArg>) -> Self {
        if let Err(ClientError::InvalidArgument(got)) = self.filters.add(arg) {
            if self.rejected.is_none() {
                self.rejected = Some(got);
            }
        }
        self
    }

    fn check_arguments(&self) -> Result<()> {
        match &self.rejected {
            Some(got) => Err(ClientError::InvalidArgument(got.clone())),
            None => Ok(()),
        }
    }

    /// Add a free expression, ANDed with the others into `q`.
    pub fn filter(mut self, expr: impl Into<Expr>) -> Self {
        self.expressions.push(expr.into());
        self
    }

    pub fn select<I, F>(mut self, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        let fields: Vec<Field> = fields.into_iter().map(Into::into).collect();

        if self.def.is_none() {
            self.def = fields.iter().find_map(|f| f.owner().cloned());
        }
        if self.def.is_none() {
            return Err(ClientError::MissingObjectType);
        }

        self.fields.extend(fields);
        Ok(self)
    }

    pub fn group_by<I, F>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        self.group_by.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn order_by<I, F>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        self.order_by.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn expressions(&self) -> &[Expr] {
        &self.expressions
    }

    /// Render the wire parameters for a request carrying `explicit`
    /// per-call parameters.
    ///
    /// Precedence: explicit params, then filters not already set, then
    /// `fields`, `group_by`, `order_by` and `q`, then the kind's default
    /// params for keys still unset, then `limit`/`offset`.
    pub fn build_search_params(&self, explicit: Map<String, Value>) -> SearchParams {
        let mut params = flatten_nested(explicit);

        for (key, values) in self.filters.iter() {
            if !params.contains_key(key) {
                params.insert(key.clone(), Value::Array(values.clone()));
            }
        }

        for (name, keys) in [
            ("fields", &self.fields),
            ("group_by", &self.group_by),
            ("order_by", &self.order_by),
        ] {
            if !keys.is_empty() {
                let rendered = keys.iter().map(|k| Value::String(k.render())).collect();
                params.extend(flatten_key(name, Value::Array(rendered)));
            }
        }

        if !self.expressions.is_empty() {
            let q = self.expressions.iter().map(Expr::render).join(" && ");
            params.extend(flatten_key("q", Value::String(q)));
        }

        if let Some(defaults) = self.def.as_ref().and_then(|d| d.default_params.clone()) {
            for (key, value) in flatten_nested(defaults) {
                if !params.contains_key(&key) {
                    params.insert(key, value);
                }
            }
        }

        if let Some(limit) = self.limit {
            params.insert("limit".to_string(), limit.into());
        }
        if let Some(offset) = self.offset {
            params.insert("offset".to_string(), offset.into());
        }

        SearchParams::from_map(&params)
    }

    fn plan(
        &self,
        method: Method,
        id: Option<Id>,
        explicit: Map<String, Value>,
        body: Option<Value>,
    ) -> Result<RequestPlan> {
        self.check_arguments()?;
        let def = self.def.clone().ok_or(ClientError::MissingObjectType)?;
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| def.collection_path());

        Ok(RequestPlan {
            method,
            path,
            id,
            params: self.build_search_params(explicit),
            body,
            def,
        })
    }

    /// Bind the kind from `record` when none is bound yet, and check that a
    /// typed record is of the bound kind or a descendant of it.
    fn validate_kind(&mut self, record: Option<&Record>) -> Result<()> {
        let record_def = record.and_then(|r| r.def.as_ref());

        if self.def.is_none() {
            let def = record_def.ok_or(ClientError::MissingObjectType)?;
            self.def = Some(Arc::clone(def));
        }
        let bound = self.def.as_ref().ok_or(ClientError::MissingObjectType)?;

        match record_def {
            Some(def) if !def.is_a(&bound.name) => Err(ClientError::TypeMismatch),
            _ => Ok(()),
        }
    }

    /// Discriminator fields first, the record's own fields winning.
    fn apply_polymorphic(&self, fields: Map<String, Value>) -> Value {
        let mut out = self
            .def
            .as_ref()
            .and_then(|d| d.polymorphic.clone())
            .unwrap_or_default();
        out.extend(fields);
        Value::Object(out)
    }

    fn require_id(record: &Record) -> Result<Id> {
        record.id().ok_or(ClientError::EmptyId)
    }

    pub fn get(self, id: &str) -> Result<RequestPlan> {
        if id.is_empty() {
            return Err(ClientError::EmptyId);
        }
        self.plan(Method::Get, Some(id.to_string()), Map::new(), None)
    }

    pub fn all(self) -> Result<RequestPlan> {
        self.plan(Method::Get, None, Map::new(), None)
    }

    pub fn create(mut self, record: Record) -> Result<RequestPlan> {
        self.validate_kind(Some(&record))?;
        let body = self.apply_polymorphic(record.fields);
        self.plan(Method::Post, None, Map::new(), Some(body))
    }

    pub fn create_many(mut self, records: Vec<Record>) -> Result<RequestPlan> {
        if records.is_empty() {
            return Err(ClientError::EmptyList);
        }

        let mut values = Vec::with_capacity(records.len());
        for record in records {
            self.validate_kind(Some(&record))?;
            values.push(self.apply_polymorphic(record.fields));
        }

        let body = json!({ "object": LIST_OBJECT, "values": values });
        self.plan(Method::Post, None, Map::new(), Some(body))
    }

    /// Update every entity matching the current filters with `data`.
    pub fn update(mut self, data: Value) -> Result<RequestPlan> {
        self.validate_kind(None)?;
        let mut params = Map::new();
        params.insert("mode".to_string(), "query".into());
        self.plan(Method::Put, None, params, Some(data))
    }

    pub fn update_one(mut self, record: Record, updates: Value) -> Result<RequestPlan> {
        self.validate_kind(Some(&record))?;
        let id = Self::require_id(&record)?;
        self.plan(Method::Put, Some(id), Map::new(), Some(updates))
    }

    pub fn update_many(mut self, updates: Vec<(Record, Value)>) -> Result<RequestPlan> {
        if updates.is_empty() {
            return Err(ClientError::EmptyList);
        }

        let mut values = Vec::with_capacity(updates.len());
        for (record, update) in updates {
            self.validate_kind(Some(&record))?;
            let id = record.id_value().cloned().ok_or(ClientError::EmptyId)?;

            let mut value = Map::new();
            value.insert("id".to_string(), id);
            value.extend(into_map(update)?);
            values.push(Value::Object(value));
        }

        let body = json!({ "object": LIST_OBJECT, "values": values });
        self.plan(Method::Put, None, Map::new(), Some(body))
    }

    /// Delete every entity matching the current filters. Refused when no
    /// filter is active.
    pub fn delete(self) -> Result<RequestPlan> {
        self.check_arguments()?;
        if self.def.is_none() || self.filters.is_empty() {
            return Err(ClientError::CannotDelete);
        }
        let mut params = Map::new();
        params.insert("mode".to_string(), "query".into());
        self.plan(Method::Delete, None, params, None)
    }

    pub fn delete_one(mut self, record: Record) -> Result<RequestPlan> {
        self.validate_kind(Some(&record))?;
        let id = Self::require_id(&record)?;
        self.plan(Method::Delete, Some(id), Map::new(), None)
    }

    pub fn delete_many(mut self, records: Vec<Record>) -> Result<RequestPlan> {
        if records.is_empty() {
            return Err(ClientError::EmptyList);
        }

        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            self.validate_kind(Some(record))?;
            ids.push(Self::require_id(record)?);
        }

        let mut params = Map::new();
        params.insert("id".to_string(), ids.join("|").into());
        params.insert("mode".to_string(), "query".into());
        self.plan(Method::Delete, None, params, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{and, or, Attr};
    use rstest::rstest;

    fn ticket() -> Arc<EntityDef> {
        Arc::new(EntityDef::new("Ticket").object("ticket"))
    }

    fn model() -> Arc<EntityDef> {
        Arc::new(EntityDef::new("Model").object("model"))
    }

    fn poly_model() -> Arc<EntityDef> {
        let mut def = EntityDef::new("PolyModel")
            .object("model")
            .polymorphic(json!({"poly": true}))
            .extends("Model");
        def.lineage = vec!["Model".into()];
        Arc::new(def)
    }

    fn other_model() -> Arc<EntityDef> {
        let mut def = EntityDef::new("OtherModel").object("other_model").extends("Model");
        def.lineage = vec!["Model".into()];
        Arc::new(def)
    }

    fn typed(def: Arc<EntityDef>, fields: Value) -> Record {
        Record::typed(def, fields).unwrap()
    }

    #[test]
    fn test_end_to_end_rendering() {
        let plan = Query::of(ticket())
            .filter_by(json!({"status": "open"}))
            .select(["*", "title"])
            .unwrap()
            .order_by(["-created_at"])
            .limit(10)
            .all()
            .unwrap();

        assert_eq!(plan.method, Method::Get);
        assert_eq!(plan.path, "/tickets");
        assert_eq!(
            plan.params.to_query_string(),
            "status=open&fields[0]=*&fields[1]=title&order_by[0]=-created_at&limit=10"
        );
    }

    #[test]
    fn test_build_search_params_full() {
        let query = Query::of(model())
            .filter_by(Attr::root().field("filter").gt(500))
            .filter_by(Attr::root().field("filter").lt(1000))
            .select(["*", "test"])
            .unwrap()
            .group_by(["month(timestamp)"])
            .order_by(["desc(timestamp)", "id"]);

        let expected: SearchParams = [
            ("filter", ">500"),
            ("filter", "<1000"),
            ("fields[0]", "*"),
            ("fields[1]", "test"),
            ("group_by[0]", "month(timestamp)"),
            ("order_by[0]", "desc(timestamp)"),
            ("order_by[1]", "id"),
        ]
        .into_iter()
        .collect();

        assert_eq!(query.build_search_params(Map::new()), expected);
    }

    #[test]
    fn test_build_search_params_empty() {
        assert!(Query::of(model()).build_search_params(Map::new()).is_empty());
    }

    #[rstest]
    #[case(vec![Attr::root().field("qfilter1").eq("val1").into()], r#"qfilter1 == "val1""#)]
    #[case(
        vec![
            Attr::root().field("qfilter1").eq("val1").into(),
            Attr::root().field("qfilter2").eq("val2").into(),
        ],
        r#"qfilter1 == "val1" && qfilter2 == "val2""#
    )]
    #[case(
        vec![
            Attr::root().field("qfilter1").eq("val1").into(),
            or([Attr::root().field("qfilter2").eq("val2"), Attr::root().field("qfilter2").eq("val3")]),
        ],
        r#"qfilter1 == "val1" && ( qfilter2 == "val2" || qfilter2 == "val3" )"#
    )]
    #[case(
        vec![
            Attr::root().field("qfilter1").field("nested1").eq("val1").into(),
            or([
                Attr::root().field("qfilter2").field("nested2").gt(500),
                Attr::root().field("qfilter2").field("nested2").lt(200),
            ]),
        ],
        r#"qfilter1[nested1] == "val1" && ( qfilter2[nested2] > 500 || qfilter2[nested2] < 200 )"#
    )]
    fn test_free_expressions_render_as_q(#[case] exprs: Vec<Expr>, #[case] q: &str) {
        let query = exprs
            .into_iter()
            .fold(Query::of(model()), |query, expr| query.filter(expr));
        let params = query.build_search_params(Map::new());

        assert_eq!(params.len(), 1);
        assert_eq!(params.get("q"), Some(q));
    }

    #[test]
    fn test_explicit_params_and_defaults_precedence() {
        let def = Arc::new(
            EntityDef::new("Ticket")
                .default_param("expand", json!(["owner", "tags"]))
                .default_param("status", "any")
                .default_param("limit", 50),
        );
        let mut explicit = Map::new();
        explicit.insert("status".into(), "closed".into());

        let params = Query::of(def)
            .filter_by(json!({"status": "open", "priority": 1}))
            .filter(and([Attr::root().field("a").eq(1), Attr::root().field("b").ne(2)]))
            .limit(5)
            .offset(20)
            .build_search_params(explicit);

        assert_eq!(params.get_all("status"), vec!["closed"]);
        assert_eq!(params.get("priority"), Some("1"));
        assert_eq!(params.get("q"), Some("( a == 1 && b != 2 )"));
        assert_eq!(params.get("expand[0]"), Some("owner"));
        assert_eq!(params.get("expand[1]"), Some("tags"));
        assert_eq!(params.get_all("limit"), vec!["5"]);
        assert_eq!(params.get("offset"), Some("20"));
    }

    #[test]
    fn test_scoped_query_adds_discriminator_filter() {
        let plan = Query::scoped(poly_model()).all().unwrap();
        assert_eq!(plan.params.to_query_string(), "poly=true");
        assert_eq!(plan.path, "/models");
    }

    #[test]
    fn test_select_infers_kind() {
        let query = Query::new().select([Attr::of(ticket()).field("title")]).unwrap();
        assert_eq!(query.def().map(|d| d.name.as_str()), Some("Ticket"));

        let query = Query::new().select([Field::from(ticket())]).unwrap();
        assert_eq!(query.build_search_params(Map::new()).get("fields[0]"), Some("*"));

        let err = Query::new().select(["title"]).unwrap_err();
        assert_eq!(err.to_string(), "Missing object type");
    }

    #[test]
    fn test_path_override_and_endpoint() {
        let plan = Query::of(ticket()).at("/search").all().unwrap();
        assert_eq!(plan.path, "/search");

        let def = Arc::new(EntityDef::new("Ticket").endpoint("/v2/issues"));
        let plan = Query::of(def).get("7").unwrap();
        assert_eq!(plan.full_path(), "/v2/issues/7");
    }

    #[rstest]
    #[case(typed(model(), json!({"test": 1})), json!({"test": 1}))]
    #[case(typed(poly_model(), json!({"test": 1})), json!({"poly": true, "test": 1}))]
    #[case(Record::raw(json!({"test": 1})).unwrap(), json!({"test": 1}))]
    fn test_create_valid(#[case] record: Record, #[case] body: Value) {
        let query = match &record.def {
            Some(def) => Query::of(Arc::clone(def)),
            None => Query::of(model()),
        };
        let plan = query.create(record).unwrap();
        assert_eq!(plan.method, Method::Post);
        assert_eq!(plan.body, Some(body));
    }

    #[test]
    fn test_create_many_valid() {
        let plan = Query::of(poly_model())
            .create_many(vec![
                typed(poly_model(), json!({"test": 1})),
                typed(poly_model(), json!({"test": 2})),
            ])
            .unwrap();
        assert_eq!(
            plan.body,
            Some(json!({
                "object": "list",
                "values": [{"poly": true, "test": 1}, {"poly": true, "test": 2}]
            }))
        );
    }

    #[rstest]
    #[case(vec![Record::raw(json!({"test": 1})).unwrap()], "Missing object type")]
    #[case(
        vec![typed(poly_model(), json!({"test": 1})), typed(model(), json!({"test": 2}))],
        "Objects must be of the same type"
    )]
    #[case(vec![], "List must not be empty")]
    fn test_create_invalid(#[case] records: Vec<Record>, #[case] message: &str) {
        let err = Query::new().create_many(records).unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn test_update_variants() {
        let plan = Query::of(model()).update(json!({"test": 1})).unwrap();
        assert_eq!(plan.params.to_query_string(), "mode=query");
        assert_eq!(plan.body, Some(json!({"test": 1})));

        let plan = Query::of(model())
            .update_one(typed(model(), json!({"id": 1})), json!({"test": 1}))
            .unwrap();
        assert_eq!(plan.full_path(), "/models/1");
        assert_eq!(plan.body, Some(json!({"test": 1})));

        let plan = Query::of(model())
            .update_many(vec![
                (Record::raw(json!({"id": 1})).unwrap(), json!({"test": 1})),
                (Record::raw(json!({"id": 2})).unwrap(), json!({"test": 2})),
            ])
            .unwrap();
        assert_eq!(
            plan.body,
            Some(json!({
                "object": "list",
                "values": [{"id": 1, "test": 1}, {"id": 2, "test": 2}]
            }))
        );
    }

    #[rstest]
    #[case(vec![(Record::raw(json!({"id": 1})).unwrap(), json!({"test": 1}))], "Missing object type")]
    #[case(
        vec![
            (typed(other_model(), json!({"id": 1})), json!({"test": 1})),
            (typed(model(), json!({"id": 2})), json!({"test": 2})),
        ],
        "Objects must be of the same type"
    )]
    #[case(
        vec![(typed(model(), json!({})), json!({"test": 1}))],
        "id cannot be empty"
    )]
    #[case(vec![], "List must not be empty")]
    fn test_update_invalid(#[case] updates: Vec<(Record, Value)>, #[case] message: &str) {
        let err = Query::new().update_many(updates).unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn test_update_one_requires_id() {
        let err = Query::of(model())
            .update_one(typed(model(), json!({"test": 1})), json!({"test": 2}))
            .unwrap_err();
        assert!(matches!(err, ClientError::EmptyId));
    }

    #[test]
    fn test_delete_variants() {
        let plan = Query::of(model()).delete_one(Record::raw(json!({"id": 1})).unwrap()).unwrap();
        assert_eq!(plan.method, Method::Delete);
        assert_eq!(plan.full_path(), "/models/1");

        let plan = Query::of(model()).filter_by(json!({"id": 1})).delete().unwrap();
        assert_eq!(plan.params.get("mode"), Some("query"));
        assert_eq!(plan.params.get("id"), Some("1"));

        let plan = Query::of(model())
            .delete_many(vec![
                typed(model(), json!({"id": 1})),
                Record::raw(json!({"id": 2})).unwrap(),
            ])
            .unwrap();
        assert_eq!(plan.params.to_query_string(), "id=1|2&mode=query");
    }

    #[rstest]
    #[case(vec![Record::raw(json!({"id": 1})).unwrap(), Record::raw(json!({"id": 2})).unwrap()], "Missing object type")]
    #[case(vec![typed(model(), json!({})), typed(model(), json!({}))], "id cannot be empty")]
    #[case(
        vec![typed(other_model(), json!({"id": 1})), typed(model(), json!({"id": 2}))],
        "Objects must be of the same type"
    )]
    #[case(vec![], "List must not be empty")]
    fn test_delete_many_invalid(#[case] records: Vec<Record>, #[case] message: &str) {
        let err = Query::new().delete_many(records).unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn test_delete_without_target_is_refused() {
        let err = Query::new().delete().unwrap_err();
        assert_eq!(err.to_string(), "Cannot perform delete");

        let err = Query::of(model()).delete().unwrap_err();
        assert_eq!(err.to_string(), "Cannot perform delete");

        let err = Query::new().delete_one(Record::raw(json!({"test": 1})).unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "Missing object type");

        let err = Query::of(model())
            .delete_one(typed(model(), json!({"test": 1})))
            .unwrap_err();
        assert_eq!(err.to_string(), "id cannot be empty");
    }

    #[rstest]
    #[case(None, "", "id cannot be empty")]
    #[case(Some(model()), "", "id cannot be empty")]
    #[case(None, "id", "Missing object type")]
    fn test_get_invalid(#[case] def: Option<Arc<EntityDef>>, #[case] id: &str, #[case] message: &str) {
        let query = def.map(Query::of).unwrap_or_default();
        assert_eq!(query.get(id).unwrap_err().to_string(), message);
    }

    #[test]
    fn test_non_object_filter_fails_the_request() {
        let err = Query::of(model())
            .filter_by(json!("x"))
            .filter_by(json!({"status": "open"}))
            .all()
            .unwrap_err();
        assert_eq!(err.to_string(), "expected a JSON object, got a string");

        let err = Query::of(model()).filter_by(json!([1, 2])).delete().unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[test]
    fn test_update_many_rejects_non_object_updates() {
        let err = Query::of(model())
            .update_many(vec![(typed(model(), json!({"id": 1})), json!("title"))])
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }
}
