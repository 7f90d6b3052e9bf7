//! REST routes for one resource, built from its named route table.

use crate::handlers::rest;
use crate::resource::EntityResource;
use crate::state::ResourceState;
use axum::{
    http::Method,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestOp {
    ReadMany,
    Count,
    ReadOne,
    Create,
    Auto,
    Update,
    Delete,
}

impl RestOp {
    fn suffix(&self) -> &'static str {
        match self {
            RestOp::ReadMany => "read_many",
            RestOp::Count => "count",
            RestOp::ReadOne => "read_one",
            RestOp::Create => "create",
            RestOp::Auto => "auto",
            RestOp::Update => "update",
            RestOp::Delete => "delete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    /// `{prefix}_{operation}`
    pub name: String,
    pub method: Method,
    pub path: String,
    pub op: RestOp,
}

/// Named routes of a resource at `base_url`. Create and auto are omitted when `create` is false.
pub fn route_table(prefix: &str, base_url: &str, create: bool) -> Vec<RouteEntry> {
    let base = base_url.trim_end_matches('/');
    let one = format!("{}/:id", base);
    let mut ops = vec![
        (RestOp::ReadMany, Method::GET, base.to_string()),
        (RestOp::Count, Method::GET, format!("{}/count", base)),
        (RestOp::ReadOne, Method::GET, one.clone()),
    ];
    if create {
        ops.push((RestOp::Create, Method::POST, base.to_string()));
        ops.push((RestOp::Auto, Method::POST, format!("{}/auto", base)));
    }
    ops.push((RestOp::Update, Method::PUT, one.clone()));
    ops.push((RestOp::Delete, Method::DELETE, one));
    ops.into_iter()
        .map(|(op, method, path)| RouteEntry {
            name: format!("{}_{}", prefix, op.suffix()),
            method,
            path,
            op,
        })
        .collect()
}

/// Register every route of `route_table` for `resource`.
pub fn rest_routes(prefix: &str, base_url: &str, create: bool, resource: Arc<EntityResource>) -> Router {
    let mut router = Router::new();
    for entry in route_table(prefix, base_url, create) {
        tracing::info!(route = %entry.name, method = %entry.method, path = %entry.path, "route registered");
        let method_router = match entry.op {
            RestOp::ReadMany => get(rest::read_many),
            RestOp::Count => get(rest::count),
            RestOp::ReadOne => get(rest::read_one),
            RestOp::Create => post(rest::create),
            RestOp::Auto => post(rest::auto),
            RestOp::Update => put(rest::update),
            RestOp::Delete => delete(rest::delete),
        };
        router = router.route(&entry.path, method_router);
    }
    router.with_state(ResourceState::new(resource))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lists_seven_named_routes() {
        let table = route_table("persons", "/persons", true);
        let names: Vec<&str> = table.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "persons_read_many",
                "persons_count",
                "persons_read_one",
                "persons_create",
                "persons_auto",
                "persons_update",
                "persons_delete"
            ]
        );
        assert_eq!(table[2].path, "/persons/:id");
        assert_eq!(table[4].method, Method::POST);
        assert_eq!(table[4].path, "/persons/auto");
    }

    #[test]
    fn creation_disabled_drops_create_and_auto() {
        let table = route_table("tags", "/tags/", false);
        assert_eq!(table.len(), 5);
        assert!(table.iter().all(|r| r.method != Method::POST));
        assert_eq!(table[0].path, "/tags");
    }
}
