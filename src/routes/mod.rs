//! Routers: per-resource REST routes and common service routes.

pub mod common;
pub mod rest;

pub use common::common_routes;
pub use rest::{rest_routes, route_table, RestOp, RouteEntry};
