pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::Session;

// Export config and error types
pub use crate::config::ClientConfig;
pub use error::{ApiError, ClientError, Result};

// Export logic types
pub use logic::{EntityRegistry, Query, RequestPlan, Resolved};

// Export all model types
pub use model::*;

// Export store types
pub use store::{HttpRequest, HttpResponse, Method, ObjectCache, ReqwestTransport, Transport};

#[cfg(test)]
mod tests {
    use crate::logic::{EntityRegistry, Query};
    use crate::model::{and, or, Attr, Data, EntityDef, Filters};
    use crate::store::ObjectCache;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_ticket_listing_end_to_end() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityDef::new("Ticket")).unwrap();
        registry
            .register(
                EntityDef::new("BugTicket")
                    .extends("Ticket")
                    .polymorphic(json!({"kind": "bug"})),
            )
            .unwrap();
        let bug = registry.require("BugTicket").unwrap();

        // 1. The listing query carries the discriminator, the projection and
        //    the free expression
        let ticket = Attr::of(Arc::clone(&bug));
        let plan = Query::scoped(Arc::clone(&bug))
            .filter_by(ticket.field("status").ne("closed"))
            .filter(or([
                ticket.field("priority").ge(3),
                ticket.field("title").contains("crash"),
            ]))
            .select([ticket.field("title"), ticket.field("owner").field("name")])
            .unwrap()
            .order_by([ticket.field("created_at").call("desc")])
            .limit(25)
            .all()
            .unwrap();

        assert_eq!(plan.full_path(), "/tickets");
        assert_eq!(
            plan.params.to_query_string(),
            concat!(
                "kind=bug&status=!closed",
                "&fields[0]=title&fields[1]=owner[name]",
                "&order_by[0]=desc(created_at)",
                r#"&q=( priority >= 3 || title ? "*crash*" )"#,
                "&limit=25"
            )
        );
        println!("✓ listing query renders");

        // 2. A listing response is resolved per element, polymorphically
        let mut cache = ObjectCache::new();
        let response = json!({
            "object": "list",
            "values": [
                {"object": "ticket", "id": "t1", "kind": "bug", "title": "crash on start"},
                {"object": "ticket", "id": "t2", "kind": "feature", "title": "dark mode"}
            ]
        });
        let resolved = crate::logic::resolve_response(
            &registry,
            &mut cache,
            crate::store::Method::Get,
            crate::store::HttpResponse::new(200, Some(response)),
        )
        .unwrap();

        let kinds: Vec<String> = resolved
            .into_vec()
            .iter()
            .filter_map(Data::as_entity)
            .filter_map(|key| cache.get(key).map(|e| e.kind().to_string()))
            .collect();
        assert_eq!(kinds, vec!["BugTicket", "Ticket"]);
        println!("✓ polymorphic resolution picks BugTicket and Ticket");
    }

    #[test]
    fn test_filters_and_expressions_are_independent_channels() {
        let status = Attr::root().field("status");
        let mut filters = Filters::new();
        filters.add(status.clone().eq("open")).unwrap();
        filters.add(json!({"status": "pending"})).unwrap();

        assert_eq!(filters.to_json(), json!({"status": ["open", "pending"]}));

        let expr = and([status.clone().eq("open"), status.ne("pending")]);
        assert_eq!(expr.render(), r#"( status == "open" && status != "pending" )"#);
    }
}
